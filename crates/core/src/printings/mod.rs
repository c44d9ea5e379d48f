//! Name → printings reverse index built from the bulk snapshot.

mod builder;
mod types;

pub use builder::{
    build_printing_index, build_printing_index_file, bulk_mtime, collect_face_aliases,
    ensure_printing_index, load_current_printing_index, load_printing_index_payload,
};
pub use types::*;
