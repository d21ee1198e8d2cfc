//! Clip pipeline: durable state machine, bounded-concurrency worker, encoder
//! and uploader seams.
//!
//! The store owns every [`clip_store::ClipRecord`] and is the single
//! transactional boundary: a clip enters via `enqueue`, is claimed by exactly
//! one worker via `claim_queued`, and moves monotonically along
//! `queued → encoding → encoded → uploading → published` with `failed` as the
//! terminal sink. The supervisor drives claimed clips through the encoder and
//! uploader seams so both stay swappable.

pub mod clip_store;
pub mod clip_title;
pub mod encoder;
pub mod uploader;
pub mod worker;

pub use clip_store::{
    ClipDestination, ClipEnqueueRequest, ClipHistoryEntry, ClipRecord, ClipRequester, ClipSource,
    ClipState, ClipStateUpdate, ClipStore,
};
pub use clip_title::build_clip_title;
pub use encoder::{build_encode_args, ClipEncoder, FfmpegEncoder};
pub use uploader::{ClipUploader, LocalArchiveUploader, PublishedClip};
pub use worker::{ClipNotifier, ClipWorkerConfig, ClipWorkerSupervisor};
