// tests/config_loader.rs

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use cronvisor::config::{
    ConfigFile, DurationValue, default_config_path, load_and_validate, load_from_str,
    parse_duration,
};
use cronvisor::errors::CronvisorError;
use cronvisor::job::ScheduleMode;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

fn validate(contents: &str) -> Result<ConfigFile, CronvisorError> {
    ConfigFile::try_from(load_from_str(contents)?)
}

#[test]
fn loads_a_full_config_from_disk() {
    let file = write_config(
        r#"
[supervisor]
kill_grace = "250ms"
shutdown_timeout = 10
max_reads_per_event = 4
read_chunk_size = 512

[job.uptime]
path = "/usr/bin/uptime"
period = "1m"
prefix = "up "
kill = true

[job.collector]
path = "/usr/local/bin/collector"
args = ["--interval", "5"]
env = { LC_ALL = "C" }
cwd = "/var/tmp"
mode = "wait_for_exit"
period = 0
reconfig = true
"#,
    );

    let cfg = load_and_validate(file.path()).expect("valid config");

    assert_eq!(cfg.supervisor.kill_grace, Duration::from_millis(250));
    assert_eq!(cfg.supervisor.shutdown_timeout, Duration::from_secs(10));
    assert_eq!(cfg.supervisor.max_reads_per_event, 4);
    assert_eq!(cfg.supervisor.read_chunk_size, 512);

    // Sorted by name.
    let names: Vec<&str> = cfg.jobs.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, vec!["collector", "uptime"]);

    let uptime = cfg.job("uptime").unwrap();
    assert_eq!(uptime.mode, ScheduleMode::Periodic);
    assert_eq!(uptime.period, 60);
    assert_eq!(uptime.prefix.as_deref(), Some("up "));
    assert!(uptime.kill);
    assert!(!uptime.reconfig);

    let collector = cfg.job("collector").unwrap();
    assert_eq!(collector.mode, ScheduleMode::WaitForExit);
    assert_eq!(collector.period, 0);
    assert_eq!(collector.args, vec!["--interval".to_string(), "5".to_string()]);
    assert_eq!(collector.env, vec![("LC_ALL".to_string(), "C".to_string())]);
    assert_eq!(collector.cwd.as_deref().and_then(|p| p.to_str()), Some("/var/tmp"));
    assert!(collector.reconfig);
}

#[test]
fn defaults_apply_when_sections_are_omitted() {
    let cfg = validate(
        r#"
[job.a]
path = "/bin/true"
period = 30
"#,
    )
    .unwrap();

    assert_eq!(cfg.supervisor.kill_grace, Duration::from_secs(1));
    assert_eq!(cfg.supervisor.shutdown_timeout, Duration::from_secs(5));
    assert_eq!(cfg.supervisor.max_reads_per_event, 10);
    assert_eq!(cfg.supervisor.read_chunk_size, 4096);

    let a = cfg.job("a").unwrap();
    assert_eq!(a.mode, ScheduleMode::Periodic);
    assert_eq!(a.period, 30);
    assert!(a.args.is_empty());
    assert!(a.prefix.is_none());
}

#[test]
fn rejects_a_config_without_jobs() {
    let err = validate("[supervisor]\nkill_grace = \"1s\"\n").unwrap_err();
    assert!(matches!(err, CronvisorError::ConfigError(msg) if msg.contains("at least one")));
}

#[test]
fn rejects_periodic_job_without_period() {
    let err = validate("[job.a]\npath = \"/bin/true\"\n").unwrap_err();
    assert!(matches!(err, CronvisorError::ConfigError(msg) if msg.contains("non-zero")));
}

#[test]
fn rejects_fractional_job_period() {
    let err = validate("[job.a]\npath = \"/bin/true\"\nperiod = \"1500ms\"\n").unwrap_err();
    assert!(matches!(err, CronvisorError::ConfigError(msg) if msg.contains("whole")));
}

#[test]
fn rejects_empty_path() {
    let err = validate("[job.a]\npath = \"\"\nperiod = 1\n").unwrap_err();
    assert!(matches!(err, CronvisorError::ConfigError(msg) if msg.contains("empty")));
}

#[test]
fn rejects_zero_limits() {
    let err = validate(
        "[supervisor]\nmax_reads_per_event = 0\n[job.a]\npath = \"/bin/true\"\nperiod = 1\n",
    )
    .unwrap_err();
    assert!(matches!(err, CronvisorError::ConfigError(msg) if msg.contains("max_reads_per_event")));
}

#[test]
fn rejects_unknown_mode_and_unknown_keys() {
    let err = validate("[job.a]\npath = \"/bin/true\"\nmode = \"sometimes\"\n").unwrap_err();
    assert!(matches!(err, CronvisorError::TomlError(_)));

    let err = validate("[job.a]\npath = \"/bin/true\"\nperiodd = 5\n").unwrap_err();
    assert!(matches!(err, CronvisorError::TomlError(_)));
}

#[test]
fn kill_mode_needs_no_period() {
    let cfg = validate("[job.a]\npath = \"/bin/true\"\nmode = \"kill\"\n").unwrap();
    assert_eq!(cfg.job("a").unwrap().mode, ScheduleMode::Kill);
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_and_validate("/definitely/not/here/Cronvisor.toml").unwrap_err();
    assert!(matches!(err, CronvisorError::IoError(_)));
}

#[test]
fn parses_durations() {
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
    assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
    assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
    assert_eq!(parse_duration(" 7 "), Ok(Duration::from_secs(7)));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("m").is_err());
    assert!(parse_duration("10d").is_err());
}

#[test]
fn duration_values_accept_numbers_and_strings() {
    #[derive(serde::Deserialize)]
    struct Wrapper {
        a: DurationValue,
        b: DurationValue,
    }
    let w: Wrapper = toml::from_str("a = 3\nb = \"3s\"\n").unwrap();
    assert_eq!(w.a, DurationValue::Seconds(3));
    assert_eq!(w.b, DurationValue::Text("3s".to_string()));
}

#[test]
fn default_path_is_in_the_working_directory() {
    assert_eq!(default_config_path().to_str(), Some("Cronvisor.toml"));
}
