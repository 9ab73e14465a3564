//! Mesh file I/O.
//!
//! The remesher reads triangle meshes and writes quad meshes as Wavefront
//! OBJ.
//!
//! ```no_run
//! use quadriflow::io::{load, save};
//! use quadriflow::prelude::*;
//!
//! let (vertices, triangles) = load("model.obj").unwrap();
//! let options = QuadriflowOptions::default().with_target_faces(1000);
//! let quads = remesh(&vertices, &triangles, &options, &Progress::none()).unwrap();
//! save(&quads, "output.obj").unwrap();
//! ```

pub mod obj;

use std::path::Path;

use crate::error::{MeshError, Result};
use crate::mesh::QuadMesh;

pub use obj::TriangleSoup;

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Wavefront OBJ format.
    Obj,
}

impl Format {
    /// Detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Format> {
        match ext.to_lowercase().as_str() {
            "obj" => Some(Format::Obj),
            _ => None,
        }
    }

    /// Detect format from file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Format> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Format::from_extension)
    }
}

fn detect(path: &Path) -> Result<Format> {
    Format::from_path(path).ok_or_else(|| MeshError::UnsupportedFormat {
        extension: path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("(none)")
            .to_string(),
    })
}

/// Load a triangle mesh, picking the format from the extension.
pub fn load<P: AsRef<Path>>(path: P) -> Result<TriangleSoup> {
    let path = path.as_ref();
    match detect(path)? {
        Format::Obj => obj::load(path),
    }
}

/// Save a quad mesh, picking the format from the extension.
pub fn save<P: AsRef<Path>>(mesh: &QuadMesh, path: P) -> Result<()> {
    let path = path.as_ref();
    match detect(path)? {
        Format::Obj => obj::save(mesh, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection() {
        assert_eq!(Format::from_path("a/b/mesh.OBJ"), Some(Format::Obj));
        assert_eq!(Format::from_path("mesh.stl"), None);
        assert!(matches!(
            load("mesh.stl"),
            Err(MeshError::UnsupportedFormat { extension }) if extension == "stl"
        ));
        assert!(matches!(
            save(&QuadMesh::default(), "noext"),
            Err(MeshError::UnsupportedFormat { .. })
        ));
    }
}
