//! Input clean-up: welding coincident vertices and dropping degenerate faces.

use std::collections::HashMap;

use nalgebra::Vector3;

use super::geometry::face_area;

/// Weld vertices closer than `eps` and remap the faces.
///
/// Positions are bucketed on a grid of cell size `eps`; a vertex joins the
/// first earlier vertex within `eps` in its own or a neighbouring cell.
/// Returns the welded positions and the remapped faces.
pub fn merge_close_vertices(
    vertices: &[Vector3<f64>],
    faces: &[[usize; 3]],
    eps: f64,
) -> (Vec<Vector3<f64>>, Vec<[usize; 3]>) {
    let eps = eps.max(f64::MIN_POSITIVE);
    let cell = |p: &Vector3<f64>| -> [i64; 3] {
        [
            (p.x / eps).floor() as i64,
            (p.y / eps).floor() as i64,
            (p.z / eps).floor() as i64,
        ]
    };

    let mut grid: HashMap<[i64; 3], Vec<usize>> = HashMap::new();
    let mut merged: Vec<Vector3<f64>> = Vec::with_capacity(vertices.len());
    let mut remap = vec![0usize; vertices.len()];

    for (i, p) in vertices.iter().enumerate() {
        let c = cell(p);
        let mut found = None;
        'search: for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if let Some(list) = grid.get(&[c[0] + dx, c[1] + dy, c[2] + dz]) {
                        if let Some(&j) = list.iter().find(|&&j| (merged[j] - p).norm() <= eps) {
                            found = Some(j);
                            break 'search;
                        }
                    }
                }
            }
        }
        remap[i] = match found {
            Some(j) => j,
            None => {
                let id = merged.len();
                merged.push(*p);
                grid.entry(c).or_default().push(id);
                id
            }
        };
    }

    let faces = faces
        .iter()
        .map(|f| [remap[f[0]], remap[f[1]], remap[f[2]]])
        .collect();
    if merged.len() < vertices.len() {
        log::debug!("merged {} coincident vertices", vertices.len() - merged.len());
    }
    (merged, faces)
}

/// Remove faces with repeated indices or an area at most `min_area`, and
/// exact duplicates of an earlier face.
///
/// Returns the number of removed faces.
pub fn remove_degenerate_faces(vertices: &[Vector3<f64>], faces: &mut Vec<[usize; 3]>, min_area: f64) -> usize {
    let before = faces.len();
    let mut seen = HashMap::with_capacity(faces.len());
    faces.retain(|f| {
        if f[0] == f[1] || f[1] == f[2] || f[0] == f[2] {
            return false;
        }
        if face_area(vertices, f) <= min_area {
            return false;
        }
        // Same cyclic order means the same oriented face.
        let rot = (0..3).min_by_key(|&k| f[k]).unwrap_or(0);
        let key = [f[rot], f[(rot + 1) % 3], f[(rot + 2) % 3]];
        seen.insert(key, ()).is_none()
    });
    let removed = before - faces.len();
    if removed > 0 {
        log::debug!("removed {} degenerate faces", removed);
    }
    removed
}

/// Drop vertices no face refers to, renumbering the faces.
///
/// Returns the map from old to new vertex ids (`None` for removed ones).
pub fn compact_vertices(vertices: &mut Vec<Vector3<f64>>, faces: &mut [[usize; 3]]) -> Vec<Option<usize>> {
    let mut map = vec![None; vertices.len()];
    let mut kept = Vec::with_capacity(vertices.len());
    for f in faces.iter_mut() {
        for v in f.iter_mut() {
            let id = match map[*v] {
                Some(id) => id,
                None => {
                    let id = kept.len();
                    kept.push(vertices[*v]);
                    map[*v] = Some(id);
                    id
                }
            };
            *v = id;
        }
    }
    *vertices = kept;
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_duplicates() {
        let v = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(1.0 + 1e-9, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
        ];
        let f = vec![[0, 1, 2], [3, 4, 2]];
        let (mv, mf) = merge_close_vertices(&v, &f, 1e-6);
        assert_eq!(mv.len(), 4);
        assert_eq!(mf[1][0], 1);
    }

    #[test]
    fn test_merge_across_cell_border() {
        let eps = 1e-3;
        let v = vec![Vector3::new(0.9999e-3, 0.0, 0.0), Vector3::new(1.0001e-3, 0.0, 0.0)];
        let (mv, _) = merge_close_vertices(&v, &[], eps);
        assert_eq!(mv.len(), 1);
    }

    #[test]
    fn test_remove_degenerate() {
        let v = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
        ];
        let mut f = vec![[0, 1, 2], [0, 0, 2], [0, 1, 3], [1, 2, 0]];
        let removed = remove_degenerate_faces(&v, &mut f, 1e-12);
        // Repeated index, collinear, and a rotated duplicate.
        assert_eq!(removed, 3);
        assert_eq!(f, vec![[0, 1, 2]]);
    }

    #[test]
    fn test_compact_vertices() {
        let mut v = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(5.0, 5.0, 5.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        let mut f = vec![[0, 2, 3]];
        let map = compact_vertices(&mut v, &mut f);
        assert_eq!(v.len(), 3);
        assert_eq!(f[0], [0, 1, 2]);
        assert_eq!(map[1], None);
    }
}
