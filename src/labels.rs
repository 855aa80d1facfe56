//! Reserved label/annotation vocabulary used to track owner/child
//! relationships (spec §3, §6).

/// Common prefix for every label and annotation this crate writes.
pub const LABEL_PREFIX: &str = "legion.epam.com";

pub const LABEL_OWNER_ID: &str = "legion.epam.com/owner-id";
pub const LABEL_OWNER_TYPE: &str = "legion.epam.com/owner-type";
pub const LABEL_OWNER_NAME: &str = "legion.epam.com/owner-name";
pub const LABEL_SUB_NAME: &str = "legion.epam.com/sub-name";
pub const LABEL_CHILD_REVISION: &str = "legion.epam.com/child-revision";

pub const ANNOTATION_URI: &str = "legion.epam.com/uri";
pub const ANNOTATION_DEFAULT_REF: &str = "legion.epam.com/defaultRef";

/// All labels a child carries that the controller owns exclusively and
/// must strip before content-hashing (spec §4.2).
pub const RESERVED_LABELS: &[&str] = &[
    LABEL_OWNER_ID,
    LABEL_OWNER_TYPE,
    LABEL_OWNER_NAME,
    LABEL_SUB_NAME,
    LABEL_CHILD_REVISION,
];

/// Builds a `k1=v1,k2=v2` label selector, matching
/// `build_selector_string` from the Python controller.
pub fn selector(owner_id: &str, owner_type: &str) -> String {
    format!(
        "{LABEL_OWNER_ID}={owner_id},{LABEL_OWNER_TYPE}={owner_type}",
        owner_id = owner_id,
        owner_type = owner_type
    )
}
