use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use tempfile::tempdir;

use signwatch::config::AppConfig;

// Environment variables are process-global, so tests touching them must
// not interleave.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn write_config(dir: &Path, name: &str, contents: &str) -> Result<std::path::PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, contents)?;
    Ok(path)
}

fn clear_env() {
    std::env::remove_var("SIGNWATCH_CONFIG");
    std::env::remove_var("SIGNWATCH_PORT");
    std::env::remove_var("SIGNWATCH_CAMERA_DEVICE");
    std::env::remove_var("SIGNWATCH_LOG_DIR");
}

#[test]
fn explicit_path_is_loaded() -> Result<()> {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let dir = tempdir()?;
    let path = write_config(
        dir.path(),
        "config.json",
        r#"{"server": {"port": 6000}, "camera": {"device": "stub://a"}}"#,
    )?;

    let cfg = AppConfig::load(Some(&path))?;
    assert_eq!(cfg.server_port, 6000);
    assert_eq!(cfg.camera.device, "stub://a");

    Ok(())
}

#[test]
fn env_var_supplies_config_path_when_no_argument() -> Result<()> {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let dir = tempdir()?;
    let path = write_config(dir.path(), "env.json", r#"{"server": {"port": 6001}}"#)?;
    std::env::set_var("SIGNWATCH_CONFIG", &path);

    let cfg = AppConfig::load(None)?;
    assert_eq!(cfg.server_port, 6001);

    clear_env();
    Ok(())
}

#[test]
fn explicit_argument_wins_over_env_path() -> Result<()> {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let dir = tempdir()?;
    let env_path = write_config(dir.path(), "env.json", r#"{"server": {"port": 6002}}"#)?;
    let arg_path = write_config(dir.path(), "arg.json", r#"{"server": {"port": 6003}}"#)?;
    std::env::set_var("SIGNWATCH_CONFIG", &env_path);

    let cfg = AppConfig::load(Some(&arg_path))?;
    assert_eq!(cfg.server_port, 6003);

    clear_env();
    Ok(())
}

#[test]
fn env_overrides_apply_after_file() -> Result<()> {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let dir = tempdir()?;
    let path = write_config(
        dir.path(),
        "config.json",
        r#"{"server": {"port": 6004}, "camera": {"device": "/dev/video9"}}"#,
    )?;
    std::env::set_var("SIGNWATCH_PORT", "7004");
    std::env::set_var("SIGNWATCH_CAMERA_DEVICE", "stub://override");
    std::env::set_var("SIGNWATCH_LOG_DIR", "/tmp/signwatch-logs");

    let cfg = AppConfig::load(Some(&path))?;
    assert_eq!(cfg.server_port, 7004);
    assert_eq!(cfg.camera.device, "stub://override");
    assert_eq!(cfg.log_dir, Path::new("/tmp/signwatch-logs"));

    clear_env();
    Ok(())
}

#[test]
fn non_numeric_port_override_is_an_error() -> Result<()> {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let dir = tempdir()?;
    let path = write_config(dir.path(), "config.json", "{}")?;
    std::env::set_var("SIGNWATCH_PORT", "not-a-port");

    let err = AppConfig::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("SIGNWATCH_PORT"));

    clear_env();
    Ok(())
}

#[test]
fn missing_file_error_mentions_config_flag() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = AppConfig::load(Some(Path::new("/nonexistent/signwatch.json"))).unwrap_err();
    assert!(err.to_string().contains("--config"));
}
