use std::io;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use thiserror::Error;

use crate::catalog::TaskCatalog;
use crate::storage::{LogEntry, LogStore, StorageError};
use crate::timer::{Timer, display_time};

const TIME_GRANULARITY: usize = 2;
const PAUSED_MARKER: &str = " ||";
const STORAGE_FAULT_TEXT: &str = "ERR storage";

/// Character display the board draws on.
pub trait DisplayAdapter {
    fn display(&mut self, text: &str, switch_backlight: bool) -> io::Result<()>;
    fn clear(&mut self) -> io::Result<()>;
    fn toggle_backlight(&mut self) -> io::Result<()>;
    fn backlight_state(&self) -> bool;
}

/// Four debounced digital inputs. `activated` reports each press at most once.
pub trait InputAdapter {
    fn activated(&mut self, button: Button) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Clock,
    Prev,
    Next,
    Pause,
}

impl Button {
    pub const ALL: [Button; 4] = [Button::Clock, Button::Prev, Button::Next, Button::Pause];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Clock,
    TaskPrev,
    TaskNext,
    TimeLog,
}

/// A point in time as both the monotonic clock and the wall clock see it.
#[derive(Debug, Clone, Copy)]
pub struct Moment {
    pub instant: Instant,
    pub wall: DateTime<Local>,
}

impl Moment {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Local::now(),
        }
    }

    #[cfg(test)]
    pub fn after(&self, elapsed: Duration) -> Self {
        Self {
            instant: self.instant + elapsed,
            wall: self.wall + chrono::Duration::from_std(elapsed).expect("duration in range"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub refresh_frequency: u64,
    pub screen_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to persist task time: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended(LogEntry),
    Extended(LogEntry),
}

/// Owns the task selection, the timer and the log, and turns button presses
/// and periodic ticks into log updates and display output.
pub struct Session<D: DisplayAdapter> {
    catalog: TaskCatalog,
    timer: Timer,
    store: LogStore,
    display: D,
    settings: SessionSettings,
    active_screen: Screen,
    last_interaction: Instant,
    last_text: Option<String>,
    view_stamp: Option<i64>,
    fault: Option<String>,
}

impl<D: DisplayAdapter> Session<D> {
    pub fn new(
        catalog: TaskCatalog,
        store: LogStore,
        display: D,
        settings: SessionSettings,
        now: Moment,
    ) -> Self {
        Self {
            catalog,
            timer: Timer::new(now.instant),
            store,
            display,
            settings,
            active_screen: Screen::Clock,
            last_interaction: now.instant,
            last_text: None,
            view_stamp: None,
            fault: None,
        }
    }

    #[cfg(test)]
    pub fn active_screen(&self) -> Screen {
        self.active_screen
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    #[cfg(test)]
    pub fn store(&self) -> &LogStore {
        &self.store
    }

    #[cfg(test)]
    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    pub fn into_display(self) -> D {
        self.display
    }

    /// Polls every button once and handles the ones that fired.
    pub fn poll_input<I: InputAdapter>(&mut self, input: &mut I, now: Moment) {
        for button in Button::ALL {
            if input.activated(button) {
                self.handle(button, now);
            }
        }
    }

    pub fn handle(&mut self, button: Button, now: Moment) {
        self.last_interaction = now.instant;

        match button {
            Button::Clock => self.active_screen = Screen::Clock,
            Button::Prev => {
                let task = self.catalog.prev().label();
                self.timer.restart(now.instant);
                self.active_screen = Screen::TaskPrev;
                info!("switched to task {task}");
            }
            Button::Next => {
                let task = self.catalog.next().label();
                self.timer.restart(now.instant);
                self.active_screen = Screen::TaskNext;
                info!("switched to task {task}");
            }
            Button::Pause => {
                if self.active_screen == Screen::TimeLog {
                    let running = self.timer.toggle(now.instant);
                    info!(
                        "timer {} at {}s",
                        if running { "resumed" } else { "paused" },
                        self.timer.elapsed(now.instant)
                    );
                } else {
                    self.active_screen = Screen::TimeLog;
                }
            }
        }

        self.render(now, true);
    }

    /// One pass of the periodic work: backlight timeout, persistence, and
    /// redrawing the active view when its content can have changed.
    pub fn tick(&mut self, now: Moment) -> Result<Option<MergeOutcome>, SessionError> {
        self.expire_backlight(now.instant);
        let merged = self.merge(now.instant);

        // A merge can change the stored total the time-log view shows.
        if !matches!(merged, Ok(None)) || self.view_stamp != Some(self.stamp(now)) {
            self.render(now, false);
        }

        merged
    }

    /// Folds the time since the last persisted window into the log. Runs at
    /// most once per `refresh_frequency` window of elapsed time and only
    /// while the timer is running.
    pub fn merge(&mut self, now: Instant) -> Result<Option<MergeOutcome>, SessionError> {
        if !self.timer.is_active() {
            return Ok(None);
        }

        let frequency = self.settings.refresh_frequency;
        let elapsed = self.timer.elapsed(now);
        let mark = elapsed - elapsed % frequency;
        if mark < frequency {
            return Ok(None);
        }

        let previous = self.timer.prev_refresh();
        if previous.is_some_and(|previous| previous >= mark) {
            return Ok(None);
        }
        self.timer.refresh(mark);

        let label = self.catalog.current().label();
        match self.persist(label, mark, mark - previous.unwrap_or(0)) {
            Ok(outcome) => {
                self.fault = None;
                debug!("merged task time: {outcome:?}");
                Ok(Some(outcome))
            }
            Err(err) => {
                self.fault = Some(err.to_string());
                Err(SessionError::Storage(err))
            }
        }
    }

    fn persist(&self, label: String, elapsed: u64, delta: u64) -> Result<MergeOutcome, StorageError> {
        match self.store.last() {
            Ok(last) if last.task_label == label => match last.seconds.checked_add(delta) {
                Some(seconds) => {
                    let entry = LogEntry::new(label, seconds);
                    self.store.replace_last(&entry)?;
                    Ok(MergeOutcome::Extended(entry))
                }
                None => {
                    warn!("stored total for {label} is full, starting a new record");
                    self.append(label, elapsed)
                }
            },
            Ok(_) => self.append(label, elapsed),
            Err(err) if err.is_absent_data() => self.append(label, elapsed),
            Err(err) => Err(err),
        }
    }

    fn append(&self, label: String, seconds: u64) -> Result<MergeOutcome, StorageError> {
        let entry = LogEntry::new(label, seconds);
        self.store.append(&entry)?;
        Ok(MergeOutcome::Appended(entry))
    }

    fn expire_backlight(&mut self, now: Instant) {
        if !self.display.backlight_state() {
            return;
        }
        if now.saturating_duration_since(self.last_interaction) <= self.settings.screen_timeout {
            return;
        }

        debug!("idle for {:?}, turning backlight off", self.settings.screen_timeout);
        if let Err(err) = self.display.toggle_backlight() {
            warn!("failed to switch backlight off: {err}");
        }
    }

    /// Blanks the display and forgets what was shown.
    pub fn blank(&mut self) {
        if let Err(err) = self.display.clear() {
            warn!("failed to clear display: {err}");
        }
        self.last_text = None;
        self.view_stamp = None;
    }

    fn stamp(&self, now: Moment) -> i64 {
        match self.active_screen {
            Screen::Clock => now.wall.timestamp(),
            _ => self.timer.elapsed(now.instant) as i64,
        }
    }

    fn render(&mut self, now: Moment, wake: bool) {
        let text = match self.active_screen {
            Screen::Clock => clock_face(now.wall),
            Screen::TaskPrev | Screen::TaskNext => self.task_text(now.instant),
            Screen::TimeLog => self.time_log_text(now.instant),
        };
        self.view_stamp = Some(self.stamp(now));
        self.show(text, wake);
    }

    fn show(&mut self, text: String, wake: bool) {
        if self.last_text.as_deref() == Some(text.as_str()) {
            if wake && !self.display.backlight_state() {
                if let Err(err) = self.display.toggle_backlight() {
                    warn!("failed to switch backlight on: {err}");
                }
            }
            return;
        }

        match self.display.display(&text, wake) {
            Ok(()) => self.last_text = Some(text),
            Err(err) => warn!("failed to draw display: {err}"),
        }
    }

    fn task_text(&self, now: Instant) -> String {
        format!(
            "{}\n{}",
            self.catalog.current(),
            display_time(self.timer.elapsed(now), TIME_GRANULARITY)
        )
    }

    fn time_log_text(&self, now: Instant) -> String {
        let label = self.catalog.current().label();
        let running = display_time(self.timer.elapsed(now), TIME_GRANULARITY);

        let total = if self.fault.is_some() {
            STORAGE_FAULT_TEXT.to_string()
        } else {
            match self.store.last() {
                Ok(entry) if entry.task_label == label => {
                    display_time(entry.seconds, TIME_GRANULARITY)
                }
                Ok(_) => running,
                Err(err) if err.is_absent_data() => running,
                Err(err) => {
                    warn!("failed to read task log: {err}");
                    STORAGE_FAULT_TEXT.to_string()
                }
            }
        };

        let marker = if self.timer.is_active() { "" } else { PAUSED_MARKER };
        format!("{label}\n{total}{marker}")
    }
}

pub fn clock_face(wall: DateTime<Local>) -> String {
    wall.format("   %d.%m.%Y\n     %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;
    use std::time::Duration;

    use tempfile::{TempDir, tempdir};

    use crate::catalog::{TaskCatalog, TaskDescriptor};
    use crate::storage::{LogEntry, LogStore};

    use super::{
        Button, DisplayAdapter, InputAdapter, MergeOutcome, Moment, Screen, Session,
        SessionError, SessionSettings, clock_face,
    };

    #[derive(Debug, Default)]
    struct RecordingDisplay {
        shown: Vec<String>,
        backlight: bool,
        toggles: usize,
    }

    impl DisplayAdapter for RecordingDisplay {
        fn display(&mut self, text: &str, switch_backlight: bool) -> io::Result<()> {
            self.shown.push(text.to_string());
            if switch_backlight {
                self.backlight = true;
            }
            Ok(())
        }

        fn clear(&mut self) -> io::Result<()> {
            self.shown.push(String::new());
            Ok(())
        }

        fn toggle_backlight(&mut self) -> io::Result<()> {
            self.backlight = !self.backlight;
            self.toggles += 1;
            Ok(())
        }

        fn backlight_state(&self) -> bool {
            self.backlight
        }
    }

    struct ScriptedInput(Vec<Button>);

    impl InputAdapter for ScriptedInput {
        fn activated(&mut self, button: Button) -> bool {
            match self.0.iter().position(|pressed| *pressed == button) {
                Some(index) => {
                    self.0.remove(index);
                    true
                }
                None => false,
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        session: Session<RecordingDisplay>,
        start: Moment,
    }

    impl Fixture {
        fn at(&self, seconds: u64) -> Moment {
            self.start.after(Duration::from_secs(seconds))
        }
    }

    fn fixture(existing: &[LogEntry]) -> Fixture {
        let dir = tempdir().expect("tempdir");
        let store = LogStore::open(dir.path().join("storage.csv"), ";");
        for entry in existing {
            store.append(entry).expect("seed log");
        }
        let catalog = TaskCatalog::new(vec![
            TaskDescriptor::new("work", "code"),
            TaskDescriptor::new("work", "mail"),
            TaskDescriptor::new("fun", "games"),
        ])
        .expect("catalog");
        let settings = SessionSettings {
            refresh_frequency: 5,
            screen_timeout: Duration::from_secs(20),
        };
        let start = Moment::now();
        let display = RecordingDisplay {
            backlight: true,
            ..RecordingDisplay::default()
        };
        let session = Session::new(catalog, store, display, settings, start);
        Fixture {
            _dir: dir,
            session,
            start,
        }
    }

    #[test]
    fn extends_last_entry_for_the_same_task() {
        let mut fx = fixture(&[LogEntry::new("work:code", 10)]);

        let outcome = fx.session.tick(fx.at(5)).expect("tick");
        assert_eq!(
            outcome,
            Some(MergeOutcome::Extended(LogEntry::new("work:code", 15)))
        );
        assert_eq!(fx.session.store().size().expect("size"), 1);
        assert_eq!(
            fx.session.store().last().expect("last"),
            LogEntry::new("work:code", 15)
        );
    }

    #[test]
    fn appends_when_the_task_differs() {
        let mut fx = fixture(&[LogEntry::new("work:code", 10)]);
        fx.session.handle(Button::Prev, fx.at(0));
        assert_eq!(fx.session.catalog().current().label(), "fun:games");

        let outcome = fx.session.tick(fx.at(5)).expect("tick");
        assert_eq!(
            outcome,
            Some(MergeOutcome::Appended(LogEntry::new("fun:games", 5)))
        );
        assert_eq!(fx.session.store().size().expect("size"), 2);
    }

    #[test]
    fn same_window_is_merged_only_once() {
        let mut fx = fixture(&[]);

        assert!(fx.session.tick(fx.at(5)).expect("tick").is_some());
        assert_eq!(fx.session.tick(fx.at(5)).expect("tick"), None);
        assert_eq!(fx.session.tick(fx.at(6)).expect("tick"), None);
        assert_eq!(fx.session.tick(fx.at(9)).expect("tick"), None);
        assert_eq!(
            fx.session.store().last().expect("last"),
            LogEntry::new("work:code", 5)
        );

        fx.session.tick(fx.at(10)).expect("tick");
        assert_eq!(fx.session.store().size().expect("size"), 1);
        assert_eq!(
            fx.session.store().last().expect("last"),
            LogEntry::new("work:code", 10)
        );
    }

    #[test]
    fn nothing_is_persisted_before_the_first_window() {
        let mut fx = fixture(&[]);
        for second in 0..5 {
            assert_eq!(fx.session.tick(fx.at(second)).expect("tick"), None);
        }
        assert_eq!(fx.session.store().size().expect("size"), 0);
    }

    #[test]
    fn skipped_windows_are_accumulated() {
        let mut fx = fixture(&[]);
        fx.session.tick(fx.at(5)).expect("tick");
        fx.session.tick(fx.at(17)).expect("tick");
        assert_eq!(
            fx.session.store().last().expect("last"),
            LogEntry::new("work:code", 15)
        );
    }

    #[test]
    fn pause_suspends_persistence_and_resume_continues() {
        let mut fx = fixture(&[]);
        fx.session.tick(fx.at(5)).expect("tick");

        fx.session.handle(Button::Pause, fx.at(6));
        assert_eq!(fx.session.active_screen(), Screen::TimeLog);
        assert!(fx.session.timer().is_active());

        fx.session.handle(Button::Pause, fx.at(7));
        assert!(!fx.session.timer().is_active());
        assert_eq!(fx.session.tick(fx.at(60)).expect("tick"), None);
        assert_eq!(
            fx.session.store().last().expect("last"),
            LogEntry::new("work:code", 5)
        );

        fx.session.handle(Button::Pause, fx.at(100));
        assert!(fx.session.timer().is_active());
        assert_eq!(fx.session.timer().elapsed(fx.at(103).instant), 10);
        fx.session.tick(fx.at(103)).expect("tick");
        assert_eq!(
            fx.session.store().last().expect("last"),
            LogEntry::new("work:code", 10)
        );
    }

    #[test]
    fn switching_tasks_restarts_the_timer() {
        let mut fx = fixture(&[]);
        assert_eq!(fx.session.timer().elapsed(fx.at(42).instant), 42);

        fx.session.handle(Button::Next, fx.at(42));
        assert_eq!(fx.session.active_screen(), Screen::TaskNext);
        assert_eq!(fx.session.catalog().current().label(), "work:mail");
        assert_eq!(fx.session.timer().elapsed(fx.at(42).instant), 0);

        fx.session.handle(Button::Pause, fx.at(43));
        fx.session.handle(Button::Pause, fx.at(44));
        assert!(!fx.session.timer().is_active());
        fx.session.handle(Button::Prev, fx.at(50));
        assert!(fx.session.timer().is_active());
        assert_eq!(fx.session.timer().elapsed(fx.at(50).instant), 0);
    }

    #[test]
    fn renders_task_and_time_log_views() {
        let mut fx = fixture(&[LogEntry::new("work:mail", 3661)]);
        fx.session.handle(Button::Next, fx.at(0));
        assert_eq!(
            fx.session.display().shown.last().map(String::as_str),
            Some("work:mail\n0s")
        );

        fx.session.handle(Button::Pause, fx.at(1));
        assert_eq!(
            fx.session.display().shown.last().map(String::as_str),
            Some("work:mail\n1h:1m")
        );

        fx.session.handle(Button::Pause, fx.at(2));
        assert_eq!(
            fx.session.display().shown.last().map(String::as_str),
            Some("work:mail\n1h:1m ||")
        );
    }

    #[test]
    fn malformed_log_defaults_to_selected_task_with_timer() {
        let mut fx = fixture(&[]);
        fs::write(fx.session.store().path(), "not a record\n").expect("write");

        fx.session.handle(Button::Pause, fx.at(0));
        assert_eq!(
            fx.session.display().shown.last().map(String::as_str),
            Some("work:code\n0s")
        );

        let outcome = fx.session.tick(fx.at(5)).expect("tick");
        assert_eq!(
            outcome,
            Some(MergeOutcome::Appended(LogEntry::new("work:code", 5)))
        );
    }

    #[test]
    fn identical_text_is_not_redrawn() {
        let mut fx = fixture(&[]);
        fx.session.handle(Button::Pause, fx.at(0));
        let draws = fx.session.display().shown.len();

        fx.session.handle(Button::Clock, fx.at(0));
        fx.session.handle(Button::Clock, fx.at(0));
        assert_eq!(fx.session.display().shown.len(), draws + 1);

        fx.session.tick(fx.at(0)).expect("tick");
        assert_eq!(fx.session.display().shown.len(), draws + 1);
    }

    #[test]
    fn clock_view_follows_the_wall_clock() {
        let mut fx = fixture(&[]);
        fx.session.handle(Button::Pause, fx.at(0));
        fx.session.handle(Button::Pause, fx.at(0));
        fx.session.handle(Button::Clock, fx.at(0));
        assert_eq!(
            fx.session.display().shown.last(),
            Some(&clock_face(fx.at(0).wall))
        );

        assert_eq!(fx.session.tick(fx.at(60)).expect("tick"), None);
        assert_eq!(
            fx.session.display().shown.last(),
            Some(&clock_face(fx.at(60).wall))
        );
        assert_ne!(clock_face(fx.at(0).wall), clock_face(fx.at(60).wall));
        assert_eq!(fx.session.active_screen(), Screen::Clock);
        assert!(!fx.session.timer().is_active());
        assert_eq!(fx.session.timer().elapsed(fx.at(60).instant), 0);
        assert_eq!(fx.session.store().size().expect("size"), 0);
    }

    #[test]
    fn time_log_view_shows_the_total_a_merge_just_stored() {
        let mut fx = fixture(&[LogEntry::new("work:code", 10)]);
        fx.session.handle(Button::Pause, fx.at(5));
        assert_eq!(
            fx.session.display().shown.last().map(String::as_str),
            Some("work:code\n10s")
        );

        let outcome = fx.session.tick(fx.at(5)).expect("tick");
        assert_eq!(
            outcome,
            Some(MergeOutcome::Extended(LogEntry::new("work:code", 15)))
        );
        assert_eq!(
            fx.session.display().shown.last().map(String::as_str),
            Some("work:code\n15s")
        );
    }

    #[test]
    fn full_stored_total_starts_a_new_record() {
        let mut fx = fixture(&[LogEntry::new("work:code", u64::MAX)]);

        let outcome = fx.session.tick(fx.at(5)).expect("tick");
        assert_eq!(
            outcome,
            Some(MergeOutcome::Appended(LogEntry::new("work:code", 5)))
        );
        assert_eq!(fx.session.store().size().expect("size"), 2);
        assert_eq!(
            fx.session.store().get_row(Some(0)).expect("first"),
            LogEntry::new("work:code", u64::MAX)
        );
    }

    #[test]
    fn idle_timeout_only_switches_the_backlight() {
        let mut fx = fixture(&[LogEntry::new("fun:games", 7)]);
        fx.session.handle(Button::Next, fx.at(0));
        fx.session.handle(Button::Pause, fx.at(0));
        fx.session.handle(Button::Pause, fx.at(0));
        let screen = fx.session.active_screen();
        let task = fx.session.catalog().current().clone();

        fx.session.tick(fx.at(20)).expect("tick");
        assert!(fx.session.display().backlight_state());

        fx.session.tick(fx.at(21)).expect("tick");
        assert!(!fx.session.display().backlight_state());
        assert_eq!(fx.session.active_screen(), screen);
        assert_eq!(fx.session.catalog().current(), &task);
        assert!(!fx.session.timer().is_active());
        assert_eq!(fx.session.store().size().expect("size"), 1);
        assert_eq!(
            fx.session.store().last().expect("last"),
            LogEntry::new("fun:games", 7)
        );

        fx.session.tick(fx.at(40)).expect("tick");
        assert_eq!(fx.session.display().toggles, 1);
    }

    #[test]
    fn persistence_continues_with_backlight_off() {
        let mut fx = fixture(&[]);
        fx.session.tick(fx.at(21)).expect("tick");
        assert!(!fx.session.display().backlight_state());
        assert_eq!(
            fx.session.store().last().expect("last"),
            LogEntry::new("work:code", 20)
        );
        fx.session.tick(fx.at(25)).expect("tick");
        assert_eq!(
            fx.session.store().last().expect("last"),
            LogEntry::new("work:code", 25)
        );
    }

    #[test]
    fn button_press_wakes_backlight_even_without_new_text() {
        let mut fx = fixture(&[]);
        fx.session.handle(Button::Clock, fx.at(0));
        fx.session.tick(fx.at(21)).expect("tick");
        assert!(!fx.session.display().backlight_state());

        fx.session.handle(Button::Clock, fx.at(21));
        assert!(fx.session.display().backlight_state());
    }

    #[test]
    fn storage_failure_is_surfaced_and_shown() {
        let mut fx = fixture(&[]);
        fs::create_dir_all(fx.session.store().path()).expect("block log path");

        fx.session.handle(Button::Pause, fx.at(0));
        let result = fx.session.tick(fx.at(5));
        assert!(matches!(result, Err(SessionError::Storage(_))));
        assert!(fx.session.fault().is_some());
        assert_eq!(
            fx.session.display().shown.last().map(String::as_str),
            Some("work:code\nERR storage")
        );

        assert_eq!(fx.session.tick(fx.at(5)).expect("no retry"), None);
    }

    #[test]
    fn polls_each_activated_button() {
        let mut fx = fixture(&[]);
        let mut input = ScriptedInput(vec![Button::Next, Button::Pause]);
        fx.session.poll_input(&mut input, fx.at(3));
        assert_eq!(fx.session.catalog().current().label(), "work:mail");
        assert_eq!(fx.session.active_screen(), Screen::TimeLog);
        assert!(fx.session.timer().is_active());
    }
}
