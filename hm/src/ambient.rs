//! Names of the values every run keeps in the global macro environment.
//!
//! None of them is made of letters only, so none can be reached through an
//! escape in the document text.

/// Directory of the file currently being read, for relative includes.
pub const INPUT_DIR: &str = "_input_dir";

/// Directory all output must stay inside.
pub const OUTPUT_ROOT: &str = "_output_root";

/// Directory pages are currently written to.
pub const OUTPUT_DIR: &str = "_output_dir";

/// Keys saved before and restored after every `\include`.
pub const FLUID_KEYS: &str = "_fluid_keys";

/// Identifier of the page whose body is being read or evaluated.
pub const PAGE_ID: &str = "_page_id";
