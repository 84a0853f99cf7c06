//! Utility functions for Trellis

/// Etag stored on a freshly created membership row
///
/// Also reported as the table etag when a row does not exist.
pub fn nil_etag() -> String {
    uuid::Uuid::nil().to_string()
}

/// Generate a brand-new opaque etag
///
/// # Examples
///
/// ```
/// use trellis_common::new_etag;
///
/// assert_ne!(new_etag(), new_etag());
/// ```
pub fn new_etag() -> String {
    uuid::Uuid::new_v4().to_string()
}
