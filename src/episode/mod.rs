mod download;
mod lifecycle;

pub use download::download_episode;
pub use lifecycle::{
    Reconciliation, delete_local_copy, discard_copies, download, is_downloaded, local_file_key,
    preferred_rate, reconcile, record_position, set_preferred_rate, store_key,
};
