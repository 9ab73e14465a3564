//! Wavefront OBJ support.
//!
//! Only geometry is read: `v` lines and `f` lines. Face corners may carry
//! texture and normal references (`f 1/2/3 ...`), which are ignored, and
//! negative indices count back from the last vertex. Polygons are split into
//! triangle fans.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Point3;

use crate::error::{MeshError, Result};
use crate::mesh::QuadMesh;

/// Triangle soup read from an OBJ file.
pub type TriangleSoup = (Vec<Point3<f64>>, Vec<[usize; 3]>);

/// Parse OBJ text into vertices and triangles.
///
/// Errors carry the 1-based line number.
pub fn parse<R: BufRead>(reader: R) -> std::result::Result<TriangleSoup, String> {
    let mut vertices = Vec::new();
    let mut faces = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| e.to_string())?;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let coords: Vec<f64> = tokens
                    .take(3)
                    .map(|t| t.parse::<f64>())
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| format!("line {}: {}", lineno + 1, e))?;
                if coords.len() != 3 {
                    return Err(format!("line {}: vertex needs three coordinates", lineno + 1));
                }
                vertices.push(Point3::new(coords[0], coords[1], coords[2]));
            }
            Some("f") => {
                let mut corners = Vec::with_capacity(4);
                for token in tokens {
                    let index = token.split('/').next().unwrap_or("");
                    let i: i64 = index
                        .parse()
                        .map_err(|_| format!("line {}: bad face index '{}'", lineno + 1, token))?;
                    let resolved = match i {
                        i if i > 0 => i - 1,
                        i if i < 0 => vertices.len() as i64 + i,
                        _ => -1,
                    };
                    if resolved < 0 {
                        return Err(format!("line {}: face index {} out of range", lineno + 1, i));
                    }
                    corners.push(resolved as usize);
                }
                if corners.len() < 3 {
                    return Err(format!("line {}: face needs at least three corners", lineno + 1));
                }
                for k in 1..corners.len() - 1 {
                    faces.push([corners[0], corners[k], corners[k + 1]]);
                }
            }
            _ => {}
        }
    }
    Ok((vertices, faces))
}

/// Load the triangles of an OBJ file.
///
/// Index validation is left to the remesher, which reports
/// [`MeshError::InvalidVertexIndex`].
///
/// # Example
///
/// ```no_run
/// use quadriflow::io::obj;
///
/// let (vertices, triangles) = obj::load("model.obj").unwrap();
/// println!("{} triangles", triangles.len());
/// # let _ = vertices;
/// ```
pub fn load<P: AsRef<Path>>(path: P) -> Result<TriangleSoup> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let (vertices, faces) = parse(BufReader::new(file)).map_err(|message| MeshError::LoadError {
        path: path.to_path_buf(),
        message,
    })?;
    if faces.is_empty() {
        return Err(MeshError::LoadError {
            path: path.to_path_buf(),
            message: "OBJ file contains no faces".to_string(),
        });
    }
    Ok((vertices, faces))
}

/// Write a quad mesh as OBJ text.
pub fn write<W: Write>(mesh: &QuadMesh, mut writer: W) -> std::io::Result<()> {
    writeln!(writer, "# Generated by quadriflow")?;
    for v in &mesh.vertices {
        writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?;
    }
    for q in &mesh.quads {
        writeln!(writer, "f {} {} {} {}", q[0] + 1, q[1] + 1, q[2] + 1, q[3] + 1)?;
    }
    writer.flush()
}

/// Save a quad mesh to an OBJ file.
///
/// # Example
///
/// ```no_run
/// use quadriflow::io::obj;
/// use quadriflow::mesh::QuadMesh;
///
/// obj::save(&QuadMesh::default(), "output.obj").unwrap();
/// ```
pub fn save<P: AsRef<Path>>(mesh: &QuadMesh, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    write(mesh, BufWriter::new(file)).map_err(|e| MeshError::SaveError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_triangulates_polygons() {
        let text = "# square\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1 4//1\n";
        let (v, f) = parse(Cursor::new(text)).unwrap();
        assert_eq!(v.len(), 4);
        assert_eq!(f, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_parse_negative_indices() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let (_, f) = parse(Cursor::new(text)).unwrap();
        assert_eq!(f, vec![[0, 1, 2]]);
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        let err = parse(Cursor::new("v 0 0 0\nv 1 x 0\n")).unwrap_err();
        assert!(err.starts_with("line 2"));
        let err = parse(Cursor::new("v 0 0 0\nf 1 0 1\n")).unwrap_err();
        assert!(err.contains("out of range"));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.obj");
        let mesh = QuadMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2, 3]],
        );
        save(&mesh, &path).unwrap();
        let (v, f) = load(&path).unwrap();
        assert_eq!(v, mesh.vertices);
        assert_eq!(f, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_load_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.obj");
        std::fs::write(&path, "v 0 0 0\n").unwrap();
        assert!(matches!(load(&path), Err(MeshError::LoadError { .. })));
    }
}
