//! Captive portal authentication
//!
//! The monitor only sees the `PortalAuthenticator` trait. `PortalNavigator`
//! implements it by driving a browser through the candidate URLs and handing
//! the landing page to the `FormFillEngine`.

pub mod form;
pub mod navigator;
pub mod selectors;
pub mod snapshot;

pub use form::FormFillEngine;
pub use navigator::{candidate_urls, NavigatorSettings, PortalNavigator};
pub use snapshot::SnapshotSink;

use async_trait::async_trait;

#[async_trait]
pub trait PortalAuthenticator: Send {
    /// Run one best-effort login attempt. `true` means a submit control was
    /// activated; it does not guarantee the portal accepted the data.
    async fn authenticate(&mut self) -> bool;

    /// Release anything an interrupted attempt left behind
    async fn shutdown(&mut self);
}
