//! # ZimView Interceptor
//!
//! Background request interceptor. Archive URLs are answered with content
//! resolved by the controller over the RPC channel; everything else goes to
//! the network. Stylesheets and scripts are kept in the persistent tier.
//!
//! ## Features
//!
//! - **Capture control**: `init` / `disable` messages switch archive capture
//! - **Placeholders**: images replaced by SVG when image display is off
//! - **Media ranges**: full-range headers on audio and video
//! - **Host lifecycle**: start on demand, eviction, install and activate
//!
//! ## Example
//!
//! ```rust,ignore
//! use zimview_sw::{FetchEvent, InterceptorHost, OfflineFetcher};
//!
//! let host = InterceptorHost::from_config(&config, &app_base, Arc::new(OfflineFetcher))?;
//! host.install().await?;
//! host.activate().await?;
//! let disposition = host.fetch(FetchEvent::get(url)).await;
//! ```

pub mod host;
pub mod interceptor;
pub mod network;
pub mod response;

pub use host::InterceptorHost;
pub use interceptor::{FetchDisposition, FetchEvent, Interceptor, InterceptorId};
pub use network::{HttpFetcher, NetError, NetworkFetcher, OfflineFetcher};
