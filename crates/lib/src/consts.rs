/// Length of the truncated plan hash.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Working directory of the root scope.
pub const ROOT_SCOPE: &str = "/";

/// Directory artifacts are staged in when `download` is given a bare name.
pub const STAGING_DIR: &str = "/";

/// `PATH` given to commands when the image environment does not set one.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
