#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parsing and validation may reject anything, but must never panic.
    let Ok(cfg) = toml::from_str::<flash_config::Config>(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    // A file that passes validation must also satisfy the controller's own checks.
    let exp = flash_core::ExperimentCfg::from(&cfg);
    if let Err(e) = flash_core::builder::validate(&exp) {
        panic!("config accepted by flash_config but rejected by flash_core: {e}");
    }
});
