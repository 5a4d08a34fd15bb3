//! The two knobs the engine exposes externally.

use std::env;
use std::path::PathBuf;

/// `goto_unsafe`: downgrade an irregular-CFG finding from a fatal error to
/// a conservative input-dependent mark plus a diagnostic, instead of
/// aborting the analysis.
///
/// `lib_config`: path to the JSON library signature registry. `None` means
/// every external call falls back to the missing-signature default.
#[derive(Clone, Debug, Default)]
pub struct AnalysisConfig {
    pub goto_unsafe: bool,
    pub lib_config: Option<PathBuf>,
}

impl AnalysisConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the two knobs off `argv` directly with `std::env::args()`
    /// rather than pulling in an argument-parsing crate.
    pub fn from_args() -> Self {
        let mut config = AnalysisConfig::new();
        let args: Vec<String> = env::args().collect();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--goto-unsafe" => config.goto_unsafe = true,
                "--lib-config" => {
                    i += 1;
                    if let Some(path) = args.get(i) {
                        config.lib_config = Some(PathBuf::from(path));
                    }
                }
                _ => {}
            }
            i += 1;
        }
        config
    }
}
