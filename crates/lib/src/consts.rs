//! Names shared across the crate.

pub const APP_NAME: &str = "rootforge";

/// Header key that declares which backend builds the image.
pub const BOOTSTRAP_KEY: &str = "bootstrap";

/// Prefix of every bundle directory created under the configured temp dir.
pub const BUNDLE_PREFIX: &str = "rootforge-bundle-";

pub const ROOTFS_DIR: &str = "rootfs";
pub const METADATA_DIR: &str = "metadata";
pub const TMP_DIR: &str = "tmp";

pub const DEFINITION_FILE: &str = "definition.json";
pub const PROVENANCE_FILE: &str = "provenance.json";
pub const ENV_FILE: &str = "env";

/// Definition sections copied into bundle metadata.
pub const ENVIRONMENT_SECTION: &str = "environment";
pub const LABELS_SECTION: &str = "labels";

/// Value of `SOURCE_DATE_EPOCH` handed to bootstrap tools (1980-01-01, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";

pub const USER_AGENT: &str = concat!("rootforge/", env!("CARGO_PKG_VERSION"));
