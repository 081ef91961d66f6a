//! Pipeline components: target classification and the tree walker.

pub mod classify;
pub mod walk;

pub use classify::{ScanTarget, SmbTarget, classify, is_smb_path};
pub use walk::{
    FileWalk, ShareEntry, ShareReader, collect_files, is_pdf, local_walk, path_to_db_string,
    share_walk, walk_with,
};
