// SPDX-License-Identifier: GPL-3.0-only

//! Periodic system sampling into a lifelog file
//!
//! While enabled, samples are appended to `<canonical>/<file_name>` on a
//! fixed interval. The log is packaged into a crash report once it holds
//! enough samples or grows too old, so it travels the same upload path as
//! crash dumps.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crash_sys::CommandRunner;
use crash_types::LifelogConfig;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

pub struct Lifelog {
    config: LifelogConfig,
    runner: Arc<dyn CommandRunner>,
    timer: Option<Interval>,
    update_count: u32,
    last_update: Option<Instant>,
}

impl Lifelog {
    pub fn new(config: LifelogConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            timer: None,
            update_count: 0,
            last_update: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.timer.is_some()
    }

    /// Enable or disable sampling into `dir`
    ///
    /// Enabling takes an initial sample right away; re-enabling an active
    /// lifelog and disabling an inactive one do nothing.
    pub fn set_enabled(&mut self, enabled: bool, dir: &Path) {
        match (enabled, self.is_active()) {
            (true, false) => {
                info!("Lifelog enabled");
                self.update(dir);
                let period = self.config.interval().max(Duration::from_secs(1));
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.timer = Some(timer);
            }
            (false, true) => {
                info!("Lifelog disabled");
                self.timer = None;
            }
            _ => {}
        }
    }

    /// Resolves at the next sampling deadline; never resolves while inactive
    pub async fn tick(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    pub fn log_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.config.file_name)
    }

    /// Append one sample, rotating the log first when it is full or stale
    pub fn update(&mut self, dir: &Path) {
        let now = Instant::now();
        let min_interval = Duration::from_secs(self.config.min_interval_secs);
        if self
            .last_update
            .is_some_and(|last| now.duration_since(last) < min_interval)
        {
            debug!("Lifelog updated recently; skipping sample");
            return;
        }

        let log = self.log_path(dir);
        if self.needs_rotation(now) {
            self.update_count = 0;
            if log.exists() {
                self.archive(dir, &log);
            }
        }

        if !log.exists() {
            for command in &self.config.header_commands {
                self.append(command, &log);
            }
        }

        for command in &self.config.sample_commands {
            self.append(command, &log);
        }

        self.update_count += 1;
        self.last_update = Some(now);
        debug!("Lifelog sample {} written", self.update_count);
    }

    /// A log is stale when nothing was sampled into it for `max_age`
    fn needs_rotation(&self, now: Instant) -> bool {
        let max_age = Duration::from_secs(self.config.max_age_secs);
        self.update_count < 1
            || self.update_count >= self.config.max_samples
            || self
                .last_update
                .is_some_and(|last| now.duration_since(last) > max_age)
    }

    fn archive(&self, dir: &Path, log: &Path) {
        let archive = dir.join(format!(
            "{}-{}.rcore.lzo",
            self.config.package_prefix,
            Utc::now().format("%Y%m%d-%H%M%S")
        ));
        let command = self
            .config
            .archive_command
            .replace("{archive}", &archive.to_string_lossy())
            .replace("{log}", &log.to_string_lossy());

        info!("Packaging lifelog into {}", archive.display());
        self.run(&command);
    }

    /// Note a detected crash in the running log
    pub fn record_core(&self, dir: &Path, core: &Path) {
        let log = self.log_path(dir);
        let is_package = core
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(&self.config.package_prefix));
        if !self.is_active() || !log.exists() || is_package {
            return;
        }

        let command = format!("echo LL_COREDUMP date=`date +%s`, {}", core.display());
        self.append(&command, &log);
    }

    fn append(&self, command: &str, log: &Path) {
        self.run(&format!("{command} >>\"{}\"", log.display()));
    }

    fn run(&self, command: &str) {
        match self.runner.run(command) {
            Ok(0) => {}
            Ok(code) => warn!("Lifelog command exited with {}: {}", code, command),
            Err(e) => warn!("Lifelog command failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::{RecordingRunner, TempDir};

    fn config() -> LifelogConfig {
        LifelogConfig {
            max_samples: 3,
            header_commands: vec!["echo HEADER".to_string()],
            sample_commands: vec!["echo SAMPLE".to_string()],
            archive_command: "mv \"{log}\" \"{archive}\"".to_string(),
            ..LifelogConfig::default()
        }
    }

    fn lifelog(runner: &Arc<RecordingRunner>) -> Lifelog {
        Lifelog::new(config(), runner.clone())
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .expect("read lifelog")
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn packages(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
            .filter(|name| name.starts_with("lifelog-") && name.ends_with(".rcore.lzo"))
            .collect();
        names.sort();
        names
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_writes_header_and_first_sample() {
        let temp = TempDir::new("lifelog");
        let runner = Arc::new(RecordingRunner::default());
        let mut lifelog = lifelog(&runner);

        lifelog.set_enabled(true, &temp.path);
        assert!(lifelog.is_active());
        assert_eq!(lines(&lifelog.log_path(&temp.path)), vec!["HEADER", "SAMPLE"]);

        lifelog.set_enabled(false, &temp.path);
        assert!(!lifelog.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn samples_closer_than_minimum_interval_are_skipped() {
        let temp = TempDir::new("lifelog");
        let runner = Arc::new(RecordingRunner::default());
        let mut lifelog = lifelog(&runner);

        lifelog.set_enabled(true, &temp.path);
        lifelog.set_enabled(false, &temp.path);
        lifelog.set_enabled(true, &temp.path);
        assert_eq!(lines(&lifelog.log_path(&temp.path)), vec!["HEADER", "SAMPLE"]);

        tokio::time::advance(Duration::from_secs(11 * 60)).await;
        lifelog.update(&temp.path);
        assert_eq!(
            lines(&lifelog.log_path(&temp.path)),
            vec!["HEADER", "SAMPLE", "SAMPLE"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn full_log_is_packaged_and_restarted() {
        let temp = TempDir::new("lifelog");
        let runner = Arc::new(RecordingRunner::default());
        let mut lifelog = lifelog(&runner);

        lifelog.set_enabled(true, &temp.path);
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(60 * 60)).await;
            lifelog.tick().await;
            lifelog.update(&temp.path);
        }

        assert_eq!(packages(&temp.path).len(), 1);
        assert_eq!(lines(&lifelog.log_path(&temp.path)), vec!["HEADER", "SAMPLE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn hourly_samples_fill_the_log_before_it_ages_out() {
        let temp = TempDir::new("lifelog");
        let runner = Arc::new(RecordingRunner::default());
        let mut lifelog = Lifelog::new(
            LifelogConfig {
                header_commands: vec!["echo HEADER".to_string()],
                sample_commands: vec!["echo SAMPLE".to_string()],
                archive_command: "mv \"{log}\" \"{archive}\"".to_string(),
                ..LifelogConfig::default()
            },
            runner.clone(),
        );

        lifelog.set_enabled(true, &temp.path);
        let mut first_package = None;
        for sample in 2..=30 {
            tokio::time::advance(Duration::from_secs(60 * 60)).await;
            lifelog.tick().await;
            lifelog.update(&temp.path);
            if first_package.is_none() && !packages(&temp.path).is_empty() {
                first_package = Some(sample);
            }
        }

        assert_eq!(first_package, Some(25));
    }

    #[tokio::test(start_paused = true)]
    async fn log_left_alone_past_max_age_is_packaged() {
        let temp = TempDir::new("lifelog");
        let runner = Arc::new(RecordingRunner::default());
        let mut lifelog = lifelog(&runner);

        lifelog.set_enabled(true, &temp.path);
        lifelog.set_enabled(false, &temp.path);

        tokio::time::advance(Duration::from_secs(11 * 60 * 60)).await;
        lifelog.update(&temp.path);
        assert!(packages(&temp.path).is_empty());
        assert_eq!(
            lines(&lifelog.log_path(&temp.path)),
            vec!["HEADER", "SAMPLE", "SAMPLE"]
        );

        tokio::time::advance(Duration::from_secs(13 * 60 * 60)).await;
        lifelog.update(&temp.path);
        let packaged = packages(&temp.path);
        assert_eq!(packaged.len(), 1);
        assert_eq!(
            lines(&temp.path.join(&packaged[0])),
            vec!["HEADER", "SAMPLE", "SAMPLE"]
        );
        assert_eq!(lines(&lifelog.log_path(&temp.path)), vec!["HEADER", "SAMPLE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn leftover_log_is_packaged_on_first_update() {
        let temp = TempDir::new("lifelog");
        fs::write(temp.path.join("lifelog"), "OLD\n").expect("write old log");
        let runner = Arc::new(RecordingRunner::default());
        let mut lifelog = lifelog(&runner);

        lifelog.set_enabled(true, &temp.path);

        let packaged = packages(&temp.path);
        assert_eq!(packaged.len(), 1);
        assert_eq!(lines(&temp.path.join(&packaged[0])), vec!["OLD"]);
        assert_eq!(lines(&lifelog.log_path(&temp.path)), vec!["HEADER", "SAMPLE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn crashes_are_recorded_except_lifelog_packages() {
        let temp = TempDir::new("lifelog");
        let runner = Arc::new(RecordingRunner::default());
        let mut lifelog = lifelog(&runner);

        lifelog.record_core(&temp.path, &temp.path.join("appX-01-11-1.rcore.lzo"));
        assert!(runner.commands().is_empty());

        lifelog.set_enabled(true, &temp.path);
        lifelog.record_core(&temp.path, &temp.path.join("appX-01-11-1.rcore.lzo"));
        lifelog.record_core(
            &temp.path,
            &temp.path.join("lifelog-20260101-000000.rcore.lzo"),
        );

        let log = lines(&lifelog.log_path(&temp.path));
        assert_eq!(log.len(), 3);
        assert!(log[2].starts_with("LL_COREDUMP date="));
        assert!(log[2].ends_with("appX-01-11-1.rcore.lzo"));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_commands_are_tolerated() {
        let temp = TempDir::new("lifelog");
        let runner = Arc::new(RecordingRunner::default());
        let mut lifelog = Lifelog::new(
            LifelogConfig {
                sample_commands: vec!["exit 7".to_string()],
                ..config()
            },
            runner.clone(),
        );

        lifelog.set_enabled(true, &temp.path);
        assert!(lifelog.is_active());
        assert_eq!(runner.commands().len(), 2);
    }
}
