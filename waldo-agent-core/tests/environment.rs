use serial_test::serial;
use waldo_agent_core::config::{
    Overrides, ProcessEnvironment, ENV_API_BUILD_ENDPOINT_OVERRIDE,
    ENV_API_TRIGGER_ENDPOINT_OVERRIDE, ENV_WRAPPER_NAME_OVERRIDE, ENV_WRAPPER_VERSION_OVERRIDE,
};
use waldo_agent_core::runtime::RuntimeInfo;

fn clear() {
    for key in [
        ENV_API_BUILD_ENDPOINT_OVERRIDE,
        ENV_API_TRIGGER_ENDPOINT_OVERRIDE,
        ENV_WRAPPER_NAME_OVERRIDE,
        ENV_WRAPPER_VERSION_OVERRIDE,
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn overrides_are_read_from_the_process_environment() {
    clear();
    std::env::set_var(ENV_API_BUILD_ENDPOINT_OVERRIDE, "http://localhost:8080/versions");
    std::env::set_var(ENV_API_TRIGGER_ENDPOINT_OVERRIDE, "");
    std::env::set_var(ENV_WRAPPER_NAME_OVERRIDE, "waldo-action");
    std::env::set_var(ENV_WRAPPER_VERSION_OVERRIDE, "3.0.1");

    let overrides = Overrides::from_env(&ProcessEnvironment);
    clear();

    assert_eq!(
        overrides.api_build_endpoint.as_deref(),
        Some("http://localhost:8080/versions")
    );
    assert_eq!(overrides.api_trigger_endpoint, None);

    let banner = RuntimeInfo::detect().version(&overrides);
    assert!(banner.starts_with("waldo-action 3.0.1 / Waldo Agent "));
}

#[test]
#[serial]
fn no_overrides_by_default() {
    clear();
    let overrides = Overrides::from_env(&ProcessEnvironment);
    assert_eq!(overrides.api_build_endpoint, None);
    assert_eq!(overrides.wrapper_name(), "");
    assert!(RuntimeInfo::detect()
        .version(&overrides)
        .starts_with("Waldo Agent "));
}
