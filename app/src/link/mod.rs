mod recovery;

pub use recovery::ElfinRecovery;

use std::time::Duration;

use tokio::time::Instant;

const UNAVAILABLE_AFTER_MISSED: u32 = 10;
const ALERT_AT_MISSED: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub reboot_interval: Duration,
    pub auto_reboot: bool,
    pub notify_unavailable: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            reboot_interval: Duration::from_secs(60),
            auto_reboot: true,
            notify_unavailable: false,
        }
    }
}

/// Side effects requested by the link monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Nothing received for a whole reboot interval.
    Silent { missed: u32 },
    Offline,
    Online,
    /// Operator notification, replaces the restart attempt of that interval.
    Alert { missed: u32 },
    Restart { missed: u32 },
}

/// Tracks bus liveness in reboot-interval units.
#[derive(Debug)]
pub struct LinkMonitor {
    settings: LinkSettings,
    last_receive: Instant,
    missed: u32,
    available: bool,
}

impl LinkMonitor {
    pub fn new(settings: LinkSettings, now: Instant) -> Self {
        Self {
            settings,
            last_receive: now,
            missed: 0,
            available: false,
        }
    }

    pub fn missed_intervals(&self) -> u32 {
        self.missed
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_receive)
    }

    /// Records a valid frame from the bus.
    pub fn record_receive(&mut self, now: Instant) -> Option<LinkEvent> {
        self.last_receive = now;
        self.missed = 0;

        if self.available {
            return None;
        }

        self.available = true;
        Some(LinkEvent::Online)
    }

    pub fn tick(&mut self, now: Instant) -> Vec<LinkEvent> {
        if self.idle_for(now) <= self.settings.reboot_interval {
            return vec![];
        }

        //restart the interval so each silent period counts once
        self.last_receive = now;
        self.missed += 1;

        let mut events = vec![LinkEvent::Silent { missed: self.missed }];
        if self.settings.auto_reboot {
            self.recover(&mut events);
        }
        events
    }

    fn recover(&mut self, events: &mut Vec<LinkEvent>) {
        if self.missed > UNAVAILABLE_AFTER_MISSED && self.available {
            self.available = false;
            events.push(LinkEvent::Offline);
        }

        if self.settings.notify_unavailable && self.missed == ALERT_AT_MISSED {
            events.push(LinkEvent::Alert { missed: self.missed });
            return;
        }

        events.push(LinkEvent::Restart { missed: self.missed });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(60);

    fn monitor(auto_reboot: bool, notify_unavailable: bool, now: Instant) -> LinkMonitor {
        LinkMonitor::new(
            LinkSettings {
                reboot_interval: INTERVAL,
                auto_reboot,
                notify_unavailable,
            },
            now,
        )
    }

    fn silent_periods(monitor: &mut LinkMonitor, start: Instant, count: u32) -> Vec<Vec<LinkEvent>> {
        (1..=count)
            .map(|i| monitor.tick(start + (INTERVAL + Duration::from_millis(1)) * i))
            .collect()
    }

    #[test]
    fn counts_each_silent_interval_once() {
        let start = Instant::now();
        let mut monitor = monitor(false, false, start);

        assert!(monitor.tick(start + INTERVAL).is_empty());

        let late = start + INTERVAL + Duration::from_millis(1);
        assert_eq!(monitor.tick(late), vec![LinkEvent::Silent { missed: 1 }]);
        assert!(monitor.tick(late + Duration::from_millis(50)).is_empty());
        assert_eq!(monitor.missed_intervals(), 1);
    }

    #[test]
    fn restart_requested_when_auto_reboot_enabled() {
        let start = Instant::now();
        let mut monitor = monitor(true, false, start);

        let events = monitor.tick(start + INTERVAL * 2);

        assert_eq!(
            events,
            vec![LinkEvent::Silent { missed: 1 }, LinkEvent::Restart { missed: 1 }]
        );
    }

    #[test]
    fn receive_resets_missed_and_announces_online_once() {
        let start = Instant::now();
        let mut monitor = monitor(true, false, start);
        silent_periods(&mut monitor, start, 3);

        let now = start + INTERVAL * 4;
        assert_eq!(monitor.record_receive(now), Some(LinkEvent::Online));
        assert_eq!(monitor.record_receive(now + Duration::from_millis(10)), None);
        assert_eq!(monitor.missed_intervals(), 0);
        assert!(monitor.is_available());
    }

    #[test]
    fn offline_after_more_than_ten_missed_intervals() {
        let start = Instant::now();
        let mut monitor = monitor(true, false, start);
        monitor.record_receive(start);

        let periods = silent_periods(&mut monitor, start, 12);

        assert!(!periods[9].contains(&LinkEvent::Offline));
        assert!(periods[10].contains(&LinkEvent::Offline));
        assert!(!periods[11].contains(&LinkEvent::Offline));
        assert!(!monitor.is_available());
    }

    #[test]
    fn never_available_link_does_not_announce_offline() {
        let start = Instant::now();
        let mut monitor = monitor(true, false, start);

        let periods = silent_periods(&mut monitor, start, 12);

        assert!(periods.iter().flatten().all(|e| *e != LinkEvent::Offline));
    }

    #[test]
    fn alert_replaces_restart_at_twenty_missed_intervals() {
        let start = Instant::now();
        let mut monitor = monitor(true, true, start);

        let periods = silent_periods(&mut monitor, start, 21);

        assert_eq!(
            periods[19],
            vec![LinkEvent::Silent { missed: 20 }, LinkEvent::Alert { missed: 20 }]
        );
        assert!(periods[20].contains(&LinkEvent::Restart { missed: 21 }));
        assert_eq!(
            periods.iter().flatten().filter(|e| matches!(e, LinkEvent::Alert { .. })).count(),
            1
        );
    }

    #[test]
    fn no_alert_without_notification() {
        let start = Instant::now();
        let mut monitor = monitor(true, false, start);

        let periods = silent_periods(&mut monitor, start, 20);

        assert!(periods[19].contains(&LinkEvent::Restart { missed: 20 }));
    }

    #[test]
    fn idle_time_since_last_receive() {
        let start = Instant::now();
        let mut monitor = monitor(true, false, start);
        monitor.record_receive(start + Duration::from_millis(100));

        assert_eq!(monitor.idle_for(start + Duration::from_millis(250)), Duration::from_millis(150));
        assert_eq!(monitor.idle_for(start), Duration::ZERO);
    }
}
