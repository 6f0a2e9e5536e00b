//! Chunk coordinate math.

use vek::*;


/// Chebyshev distance between two chunk coordinates.
///
/// This is the index of the ring around `a` on which `b` lies, so `ring(a, ring_distance(a, b))`
/// yields `b`.
pub fn ring_distance(a: Vec3<i64>, b: Vec3<i64>) -> i64 {
    let d = (b - a).map(i64::abs);
    i64::max(d.x, i64::max(d.y, d.z))
}

/// Iterator over the chunk coordinates at Chebyshev distance exactly `d` from `center`.
///
/// For `d == 0` yields just `center`. Each coordinate is yielded once. Negative `d` yields
/// nothing.
pub fn ring(center: Vec3<i64>, d: i64) -> impl Iterator<Item=Vec3<i64>> {
    // walk the enclosing cube and keep the outermost shell. wasteful by a constant factor, but
    // at streaming radii the cube is small and this keeps the walk obviously exhaustive
    cube_corner_extent(center - Vec3::broadcast(d), d * 2 + 1)
        .filter(move |&cc| ring_distance(center, cc) == d)
}

/// Iterator over the chunk coordinates at Chebyshev distance at most `r` from `center`.
pub fn cube(center: Vec3<i64>, r: i64) -> impl Iterator<Item=Vec3<i64>> {
    cube_corner_extent(center - Vec3::broadcast(r), r * 2 + 1)
}

// iterator over the cube of coordinates starting at corner with the given edge length, in
// x-innermost order. non-positive edge yields nothing.
fn cube_corner_extent(corner: Vec3<i64>, edge: i64) -> impl Iterator<Item=Vec3<i64>> {
    let edge = i64::max(edge, 0);
    (0..edge)
        .flat_map(move |y| (0..edge)
            .flat_map(move |z| (0..edge)
                .map(move |x| corner + Vec3 { x, y, z })))
}


#[test]
fn ring_distance_is_chebyshev() {
    let a = Vec3 { x: 1, y: -2, z: 3 };
    assert_eq!(ring_distance(a, a), 0);
    assert_eq!(ring_distance(a, a + Vec3 { x: 4, y: 0, z: 0 }), 4);
    assert_eq!(ring_distance(a, a + Vec3 { x: -1, y: 2, z: -5 }), 5);
    assert_eq!(ring_distance(a, a + Vec3 { x: 3, y: -3, z: 3 }), 3);
}

#[test]
fn ring_counts() {
    let center = Vec3 { x: -7, y: 0, z: 9 };
    assert_eq!(ring(center, 0).count(), 1);
    // shell of a cube: (2d+1)^3 - (2d-1)^3
    assert_eq!(ring(center, 1).count(), 26);
    assert_eq!(ring(center, 2).count(), 98);
    assert_eq!(ring(center, -1).count(), 0);
}

#[test]
fn ring_is_exactly_at_distance() {
    let center = Vec3 { x: 2, y: 2, z: 2 };
    for d in 0..4 {
        for cc in ring(center, d) {
            assert_eq!(ring_distance(center, cc), d);
        }
    }
}

#[test]
fn rings_partition_cube() {
    let center = Vec3 { x: 0, y: 1, z: 0 };
    let r = 3;
    let mut from_rings = (0..=r).flat_map(|d| ring(center, d)).collect::<Vec<_>>();
    let mut from_cube = cube(center, r).collect::<Vec<_>>();
    from_rings.sort_by_key(|cc| (cc.x, cc.y, cc.z));
    from_cube.sort_by_key(|cc| (cc.x, cc.y, cc.z));
    from_rings.dedup();
    assert_eq!(from_rings, from_cube);
    assert_eq!(from_cube.len(), (2 * r as usize + 1).pow(3));
}
