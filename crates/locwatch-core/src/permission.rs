//! Location permission gate.
//!
//! Thin layer over [`PermissionHost`]: live checks with no caching, prompts
//! tagged with [`PERMISSION_REQUEST_CODE`], and filtering of results that
//! belong to someone else.

use std::fmt;
use std::sync::Arc;

use crate::host::{
    GrantResult, PermissionHost, PermissionStatus, RequestCode, LOCATION_PERMISSION,
    PERMISSION_REQUEST_CODE,
};

/// What a permission result means for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    /// The location permission was granted.
    Granted,
    /// The location permission was denied.
    Denied,
    /// The result was ours but carried no grant entry (prompt dismissed).
    Dismissed,
}

/// Checks and requests the location permission.
pub struct PermissionGate {
    host: Arc<dyn PermissionHost>,
    debug_logging: bool,
}

impl PermissionGate {
    /// Create a gate over `host`.
    pub fn new(host: Arc<dyn PermissionHost>, debug_logging: bool) -> Self {
        Self {
            host,
            debug_logging,
        }
    }

    /// Live permission state.
    pub fn status(&self) -> PermissionStatus {
        self.host.check(LOCATION_PERMISSION)
    }

    /// Whether the location permission is granted right now.
    pub fn has_permission(&self) -> bool {
        self.status().is_granted()
    }

    /// Show the permission prompt unconditionally.
    pub fn request_permission(&self) {
        debug_log!(
            self.debug_logging,
            request_code = %PERMISSION_REQUEST_CODE,
            "requesting location permission"
        );
        self.host.request(LOCATION_PERMISSION, PERMISSION_REQUEST_CODE);
    }

    /// Show the permission prompt unless already granted.
    /// Returns whether a prompt was issued.
    pub fn request_permission_if_needed(&self) -> bool {
        if self.has_permission() {
            debug_log!(self.debug_logging, "location permission already granted");
            return false;
        }
        self.request_permission();
        true
    }

    /// Interpret a permission result.
    ///
    /// Returns `None` when `request_code` is not ours, so the caller can
    /// forward the result to other handlers. Only the first grant entry is
    /// considered, matching the single permission this gate requests.
    pub fn on_permission_result(
        &self,
        request_code: RequestCode,
        permissions: &[&str],
        grant_results: &[GrantResult],
    ) -> Option<PermissionOutcome> {
        if request_code != PERMISSION_REQUEST_CODE {
            debug_log!(
                self.debug_logging,
                %request_code,
                "not handling permission result: unknown request code"
            );
            return None;
        }

        let outcome = match grant_results.first() {
            Some(GrantResult::Granted) => PermissionOutcome::Granted,
            Some(GrantResult::Denied) => PermissionOutcome::Denied,
            None => PermissionOutcome::Dismissed,
        };
        debug_log!(
            self.debug_logging,
            ?permissions,
            ?outcome,
            "location permission result"
        );
        Some(outcome)
    }
}

impl fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionGate").finish_non_exhaustive()
    }
}
