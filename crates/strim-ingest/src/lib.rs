//! Platform ingestion adapters for Strim.
//!
//! One adapter instance owns one external session for one tenant: Twitch uses
//! a persistent IRC-over-WebSocket stream, YouTube a quota-metered polling
//! loop, TikTok a browser-session-mediated HTTP bridge. Every adapter
//! normalizes native messages into [`strim_events::NormalizedEvent`] and
//! reports failures through the shared fatal/transient taxonomy so the
//! scheduler can decide between retrying and permanently stopping a platform.

pub mod adapter_contract;
pub mod session_service;
pub mod tiktok_session;
pub mod twitch_stream;
pub mod youtube_poll;

pub use adapter_contract::{AdapterError, IngestAdapter};
pub use session_service::{SessionService, SessionServiceConfig};
pub use tiktok_session::{TiktokSessionAdapter, TiktokSessionConfig};
pub use twitch_stream::{TwitchStreamAdapter, TwitchStreamConfig};
pub use youtube_poll::{YoutubePollAdapter, YoutubePollConfig};
