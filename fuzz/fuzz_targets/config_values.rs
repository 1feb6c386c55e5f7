#![no_main]

use libfuzzer_sys::fuzz_target;
use perfil::config::{ConfigResolver, PartialConfig};
use std::collections::HashMap;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Any environment value must either resolve or be rejected, never panic
        let mut values = input.splitn(3, '\n');
        let env = HashMap::from([
            (
                "PERFIL_PROFILING_ENABLED".to_string(),
                values.next().unwrap_or_default().to_string(),
            ),
            (
                "PERFIL_PROFILING_SORT_BY".to_string(),
                values.next().unwrap_or_default().to_string(),
            ),
            (
                "PERFIL_PROFILING_MAX_RESULTS".to_string(),
                values.next().unwrap_or_default().to_string(),
            ),
        ]);
        if let Ok(config) = ConfigResolver::with_env(env).resolve(&PartialConfig::new()) {
            assert!(config.max_results() > 0);
        }
    }
});
