//! Binned surface area heuristic.
//!
//! Every range is first binned along the world axes. Ranges of orientable
//! primitives whose best aligned split is not clearly cheaper than a leaf are
//! also binned in a frame following the dominant curve direction, and split
//! into two strands of differently oriented curves.

use glam::*;
use rayon::prelude::*;
use std::marker::PhantomData;

use crate::primitives::LeafPrimitive;
use crate::{Aabb, DerivedSettings, Frame, PrimInfo, PrimRef, Scene};

/// Ranges at least this many times the parallel threshold are binned in
/// parallel.
const PARALLEL_BINNING_FACTOR: usize = 4;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BinMapping {
    num: usize,
    ofs: Vec3,
    scale: Vec3,
}

impl BinMapping {
    pub fn new(cent_bounds: &Aabb, count: usize, bins: usize) -> Self {
        let num = bins.min(4 + count / 20).max(2);
        let (lower, _) = cent_bounds.points();
        let diag = cent_bounds.lengths();
        let scale_of = |d: f32| {
            if d > 1e-34 {
                0.99 * num as f32 / d
            } else {
                0.0
            }
        };

        Self {
            num,
            ofs: lower,
            scale: Vec3::new(scale_of(diag.x), scale_of(diag.y), scale_of(diag.z)),
        }
    }

    pub fn len(&self) -> usize {
        self.num
    }

    #[inline(always)]
    pub fn bin(&self, p: Vec3) -> [usize; 3] {
        let b = (p - self.ofs) * self.scale;
        let clamp = |x: f32| (x.floor().max(0.0) as usize).min(self.num - 1);
        [clamp(b.x), clamp(b.y), clamp(b.z)]
    }

    pub fn is_valid(&self, axis: usize) -> bool {
        self.scale[axis] > 0.0
    }
}

#[derive(Clone)]
struct Bins {
    bounds: Vec<[Aabb; 3]>,
    counts: Vec<[usize; 3]>,
}

impl Bins {
    fn new(num: usize) -> Self {
        Self {
            bounds: vec![[Aabb::empty(); 3]; num],
            counts: vec![[0; 3]; num],
        }
    }

    fn add(&mut self, mapping: &BinMapping, bounds: &Aabb) {
        let bin = mapping.bin(bounds.center());
        for axis in 0..3 {
            self.bounds[bin[axis]][axis].grow_bb(bounds);
            self.counts[bin[axis]][axis] += 1;
        }
    }

    fn merge(mut self, other: Bins) -> Bins {
        for (i, (bounds, counts)) in other.bounds.iter().zip(other.counts.iter()).enumerate() {
            for axis in 0..3 {
                self.bounds[i][axis].grow_bb(&bounds[axis]);
                self.counts[i][axis] += counts[axis];
            }
        }
        self
    }

    /// Best position over all valid axes as `(sah, axis, pos)`, where
    /// `pos` is the first bin of the right side.
    fn best(&self, mapping: &BinMapping, settings: &DerivedSettings) -> Option<(f32, usize, usize)> {
        let num = mapping.len();
        let mut best: Option<(f32, usize, usize)> = None;
        let mut right_area = vec![0.0f32; num];
        let mut right_count = vec![0usize; num];

        for axis in 0..3 {
            if !mapping.is_valid(axis) {
                continue;
            }

            let mut bounds = Aabb::empty();
            let mut count = 0;
            for pos in (1..num).rev() {
                bounds.grow_bb(&self.bounds[pos][axis]);
                count += self.counts[pos][axis];
                right_area[pos] = bounds.area();
                right_count[pos] = count;
            }

            let mut bounds = Aabb::empty();
            let mut count = 0;
            for pos in 1..num {
                bounds.grow_bb(&self.bounds[pos - 1][axis]);
                count += self.counts[pos - 1][axis];
                if count == 0 || right_count[pos] == 0 {
                    continue;
                }

                let sah = bounds.area() * settings.blocks(count) as f32
                    + right_area[pos] * settings.blocks(right_count[pos]) as f32;
                if best.map_or(true, |(b, _, _)| sah < b) {
                    best = Some((sah, axis, pos));
                }
            }
        }

        best
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ObjectSplit {
    pub axis: usize,
    pub pos: usize,
    pub sah: f32,
    pub mapping: BinMapping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SplitKind {
    Aligned(ObjectSplit),
    /// Split binned in `frame`; `local` holds the range's bounds in that
    /// frame, reordered along with the references.
    Oriented {
        frame: Frame,
        split: ObjectSplit,
        local: Vec<Aabb>,
    },
    /// Curves closer in direction to `axis0` go left, the rest right.
    Strand { axis0: Vec3, axis1: Vec3 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub kind: SplitKind,
    pub cost: f32,
}

impl Split {
    pub fn is_oriented(&self) -> bool {
        !matches!(self.kind, SplitKind::Aligned(_))
    }
}

pub struct CostEvaluator<'s, P> {
    scene: &'s dyn Scene,
    settings: &'s DerivedSettings,
    _marker: PhantomData<P>,
}

impl<'s, P: LeafPrimitive> CostEvaluator<'s, P> {
    pub fn new(scene: &'s dyn Scene, settings: &'s DerivedSettings) -> Self {
        Self {
            scene,
            settings,
            _marker: PhantomData,
        }
    }

    pub fn leaf_cost(&self, count: usize) -> f32 {
        self.settings.leaf_cost(count)
    }

    /// Frame following the direction of the curve with the lowest id that
    /// has a usable direction; identity when none does.
    pub fn aligned_space(&self, prims: &[PrimRef]) -> Frame {
        let mut axis = Vec3::ZERO;
        let mut best_id = u64::MAX;
        for prim in prims {
            let id = prim.id64();
            if id >= best_id {
                continue;
            }
            let dir = P::direction(self.scene, prim);
            if dir.length_squared() > 1e-18 {
                axis = dir;
                best_id = id;
            }
        }
        Frame::from_axis(axis)
    }

    /// Bounds of every reference in `frame`.
    pub fn bounds_in(&self, prims: &[PrimRef], frame: &Frame) -> Vec<Aabb> {
        prims
            .iter()
            .map(|prim| P::bounds_in_frame(self.scene, prim, frame))
            .collect()
    }

    fn bin(&self, bounds: &[Aabb], cent_bounds: &Aabb) -> Option<ObjectSplit> {
        let mapping = BinMapping::new(cent_bounds, bounds.len(), self.settings.bins);

        let bins = if bounds.len() >= self.settings.parallel_threshold * PARALLEL_BINNING_FACTOR {
            bounds
                .par_chunks(self.settings.parallel_threshold)
                .map(|chunk| {
                    let mut bins = Bins::new(mapping.len());
                    chunk.iter().for_each(|b| bins.add(&mapping, b));
                    bins
                })
                .reduce(|| Bins::new(mapping.len()), Bins::merge)
        } else {
            let mut bins = Bins::new(mapping.len());
            bounds.iter().for_each(|b| bins.add(&mapping, b));
            bins
        };

        bins.best(&mapping, self.settings).map(|(sah, axis, pos)| ObjectSplit {
            axis,
            pos,
            sah,
            mapping,
        })
    }

    fn aligned(&self, prims: &[PrimRef], info: &PrimInfo) -> Option<ObjectSplit> {
        let bounds: Vec<Aabb> = prims.iter().map(|p| p.bounds).collect();
        self.bin(&bounds, &info.cent_bounds)
    }

    fn oriented(&self, prims: &[PrimRef]) -> Option<(Frame, ObjectSplit, Vec<Aabb>)> {
        let frame = self.aligned_space(prims);
        let local = self.bounds_in(prims, &frame);
        let cent_bounds: Aabb = local.iter().map(|b| Aabb::from_points(&[b.center()])).collect();
        self.bin(&local, &cent_bounds).map(|split| (frame, split, local))
    }

    fn strand(&self, prims: &[PrimRef]) -> Option<(Vec3, Vec3, f32)> {
        let first = prims.first()?;
        let axis0 = P::direction(self.scene, first).normalize_or_zero();

        let mut best_cos = 1.0;
        let mut axis1 = axis0;
        for prim in prims.iter() {
            let axis = P::direction(self.scene, prim).normalize_or_zero();
            let cos = axis.dot(axis0).abs();
            if cos < best_cos {
                best_cos = cos;
                axis1 = axis;
            }
        }

        let space0 = Frame::from_axis(axis0);
        let space1 = Frame::from_axis(axis1);
        let (mut lnum, mut rnum) = (0, 0);
        let (mut lbounds, mut rbounds) = (Aabb::empty(), Aabb::empty());
        for prim in prims.iter() {
            let axis = P::direction(self.scene, prim).normalize_or_zero();
            if axis.dot(axis0).abs() > axis.dot(axis1).abs() {
                lnum += 1;
                lbounds.grow_bb(&P::bounds_in_frame(self.scene, prim, &space0));
            } else {
                rnum += 1;
                rbounds.grow_bb(&P::bounds_in_frame(self.scene, prim, &space1));
            }
        }

        if lnum == 0 || rnum == 0 {
            return None;
        }

        let sah = lbounds.area() * self.settings.blocks(lnum) as f32
            + rbounds.area() * self.settings.blocks(rnum) as f32;
        Some((axis0, axis1, sah))
    }

    /// Cheapest split of the range, `None` when no heuristic separates it.
    pub fn find(&self, prims: &[PrimRef], info: &PrimInfo) -> Option<Split> {
        let area = info.geom_bounds.area();
        let s = self.settings;
        let cost = |trav: f32, sah: f32| {
            let ratio = if area > 0.0 { sah / area } else { 0.0 };
            trav + s.int_cost * ratio
        };

        let mut best = self.aligned(prims, info).map(|split| Split {
            cost: cost(s.trav_cost_aligned, split.sah),
            kind: SplitKind::Aligned(split),
        });

        if !P::ORIENTABLE {
            return best;
        }

        let leaf_cost = self.leaf_cost(prims.len());
        if best
            .as_ref()
            .map_or(false, |split| split.cost <= s.oriented_threshold * leaf_cost)
        {
            return best;
        }

        if let Some((frame, split, local)) = self.oriented(prims) {
            let oriented_cost = cost(s.trav_cost_oriented, split.sah);
            if best.as_ref().map_or(true, |b| oriented_cost < b.cost) {
                best = Some(Split {
                    kind: SplitKind::Oriented { frame, split, local },
                    cost: oriented_cost,
                });
            }
        }

        if let Some((axis0, axis1, sah)) = self.strand(prims) {
            let strand_cost = cost(s.trav_cost_oriented, sah);
            if best.as_ref().map_or(true, |b| strand_cost < b.cost) {
                best = Some(Split {
                    kind: SplitKind::Strand { axis0, axis1 },
                    cost: strand_cost,
                });
            }
        }

        best
    }

    /// Reorders `prims` so the left side of `split` comes first and returns
    /// its size.
    pub fn partition(&self, prims: &mut [PrimRef], split: &mut Split) -> usize {
        let mut left = 0;
        match &mut split.kind {
            SplitKind::Aligned(s) => {
                for i in 0..prims.len() {
                    if s.mapping.bin(prims[i].center())[s.axis] < s.pos {
                        prims.swap(i, left);
                        left += 1;
                    }
                }
            }
            SplitKind::Oriented { split: s, local, .. } => {
                for i in 0..prims.len() {
                    if s.mapping.bin(local[i].center())[s.axis] < s.pos {
                        prims.swap(i, left);
                        local.swap(i, left);
                        left += 1;
                    }
                }
            }
            SplitKind::Strand { axis0, axis1 } => {
                for i in 0..prims.len() {
                    let axis = P::direction(self.scene, &prims[i]).normalize_or_zero();
                    if axis.dot(*axis0).abs() > axis.dot(*axis1).abs() {
                        prims.swap(i, left);
                        left += 1;
                    }
                }
            }
        }
        left
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::test_scene::*;
    use crate::primitives::{Bezier1, Triangle1};
    use crate::{BezierCurve, BuildSettings, Triangle};

    fn tri_at(x: f32) -> Triangle {
        Triangle::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 0.1, 0.0, 0.0), Vec3::new(x, 0.1, 0.0))
    }

    fn refs(scene: &Mixed) -> Vec<PrimRef> {
        let mut prims: Vec<PrimRef> = scene
            .tris
            .0
            .iter()
            .enumerate()
            .map(|(i, t)| PrimRef::new(t.bounds(), 0, i as u32))
            .collect();
        prims.extend(
            scene
                .curves
                .0
                .iter()
                .enumerate()
                .map(|(i, c)| PrimRef::new(c.bounds(), 1, i as u32)),
        );
        prims
    }

    #[test]
    fn mapping_clamps_to_range() {
        let cent = Aabb::from((Vec3::ZERO, Vec3::new(1.0, 0.0, 2.0)));
        let mapping = BinMapping::new(&cent, 1000, 32);
        assert_eq!(mapping.len(), 32);
        assert!(mapping.is_valid(0) && !mapping.is_valid(1) && mapping.is_valid(2));
        assert_eq!(mapping.bin(Vec3::new(-5.0, 0.0, 0.0))[0], 0);
        assert_eq!(mapping.bin(Vec3::new(1.0, 0.0, 2.0)), [31, 0, 31]);
    }

    #[test]
    fn separates_two_clusters() {
        let mut tris: Vec<Triangle> = (0..8).map(|i| tri_at(i as f32 * 0.01)).collect();
        tris.extend((0..8).map(|i| tri_at(100.0 + i as f32 * 0.01)));
        let scene = Mixed {
            tris: Tris(tris),
            curves: Curves(vec![]),
        };
        let settings = BuildSettings::default().derive(1, 16).unwrap();
        let eval = CostEvaluator::<Triangle1>::new(&scene, &settings);

        let mut prims = refs(&scene);
        prims.reverse();
        let info = PrimInfo::from_prims(&prims);
        let mut split = eval.find(&prims, &info).unwrap();
        assert!(matches!(split.kind, SplitKind::Aligned(ObjectSplit { axis: 0, .. })));
        assert!(split.cost < eval.leaf_cost(prims.len()));

        let left = eval.partition(&mut prims, &mut split);
        assert_eq!(left, 8);
        assert!(prims[..left].iter().all(|p| p.center().x < 50.0));
        assert!(prims[left..].iter().all(|p| p.center().x > 50.0));
    }

    #[test]
    fn identical_references_cannot_split() {
        let scene = Mixed {
            tris: Tris(vec![tri_at(1.0); 10]),
            curves: Curves(vec![]),
        };
        let settings = BuildSettings::default().derive(1, 10).unwrap();
        let eval = CostEvaluator::<Triangle1>::new(&scene, &settings);
        let prims = refs(&scene);
        assert!(eval.find(&prims, &PrimInfo::from_prims(&prims)).is_none());
    }

    fn diagonal_curve(offset: Vec3, dir: Vec3) -> BezierCurve {
        let p = |t: f32| (offset + dir * t).extend(0.01);
        BezierCurve::new([p(0.0), p(1.0 / 3.0), p(2.0 / 3.0), p(1.0)])
    }

    #[test]
    fn parallel_diagonal_curves_prefer_oriented_bins() {
        let dir = Vec3::new(1.0, 1.0, 1.0);
        let side = Vec3::new(1.0, -1.0, 0.0).normalize();
        let curves: Vec<BezierCurve> = (0..16)
            .map(|i| diagonal_curve(side * (i as f32 * 0.05), dir * 10.0))
            .collect();
        let scene = Mixed {
            tris: Tris(vec![]),
            curves: Curves(curves),
        };
        let settings = BuildSettings::default().derive(1, 16).unwrap();
        let eval = CostEvaluator::<Bezier1>::new(&scene, &settings);
        let prims = refs(&scene);

        let frame = eval.aligned_space(&prims);
        assert!((frame.vz - dir.normalize()).length() < 1e-5);

        let split = eval.find(&prims, &PrimInfo::from_prims(&prims)).unwrap();
        assert!(split.is_oriented(), "{:?}", split.kind);
    }

    #[test]
    fn equal_costs_keep_the_aligned_split() {
        // Point-like curves have no direction, so the oriented frame is the
        // identity and both binnings see the same boxes.
        let curves: Vec<BezierCurve> = (0..16)
            .map(|i| {
                let p = Vec3::new(i as f32, 0.5 * (i % 3) as f32, 0.0).extend(0.05);
                BezierCurve::new([p; 4])
            })
            .collect();
        let scene = Mixed {
            tris: Tris(vec![]),
            curves: Curves(curves),
        };
        let settings = BuildSettings::default()
            .with_costs(1.0, 1.0, 1.0)
            .with_oriented_threshold(0.0)
            .derive(1, 16)
            .unwrap();
        let eval = CostEvaluator::<Bezier1>::new(&scene, &settings);
        let prims = refs(&scene);
        let info = PrimInfo::from_prims(&prims);

        assert_eq!(eval.aligned_space(&prims), Frame::IDENTITY);
        assert!(eval.strand(&prims).is_none());
        let aligned = eval.aligned(&prims, &info).unwrap();
        let (_, oriented, _) = eval.oriented(&prims).unwrap();
        assert_eq!(aligned.sah, oriented.sah);

        let split = eval.find(&prims, &info).unwrap();
        assert!(matches!(split.kind, SplitKind::Aligned(_)), "{:?}", split.kind);
    }

    #[test]
    fn crossing_strands_split_by_direction() {
        let mut curves: Vec<BezierCurve> = (0..8)
            .map(|i| diagonal_curve(Vec3::new(-5.0, 0.0, i as f32 * 0.01), Vec3::X * 10.0))
            .collect();
        curves.extend((0..8).map(|i| diagonal_curve(Vec3::new(0.0, -5.0, i as f32 * 0.01), Vec3::Y * 10.0)));
        let scene = Mixed {
            tris: Tris(vec![]),
            curves: Curves(curves),
        };
        let settings = BuildSettings::default().derive(1, 16).unwrap();
        let eval = CostEvaluator::<Bezier1>::new(&scene, &settings);

        let mut prims = refs(&scene);
        let (axis0, axis1, _) = eval.strand(&prims).unwrap();
        assert!((axis0 - Vec3::X).length() < 1e-5);
        assert!((axis1 - Vec3::Y).length() < 1e-5);

        let mut split = Split {
            kind: SplitKind::Strand { axis0, axis1 },
            cost: 0.0,
        };
        let left = eval.partition(&mut prims, &mut split);
        assert_eq!(left, 8);
        assert!(prims[..left].iter().all(|p| p.prim_id < 8));
    }
}
