// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::event::TimeOnPageData;

/// Accumulates total, active and idle time since page load
#[derive(Debug, Clone)]
pub struct TimeOnPage {
    page_load_at: i64,
    active_ms: i64,
    last_active_start: i64,
    is_active: bool,
}

impl TimeOnPage {
    pub fn new(now: i64) -> Self {
        Self {
            page_load_at: now,
            active_ms: 0,
            last_active_start: now,
            is_active: true,
        }
    }

    pub fn mark_active(&mut self, now: i64) {
        if !self.is_active {
            self.is_active = true;
            self.last_active_start = now;
        }
    }

    pub fn mark_idle(&mut self, now: i64) {
        if self.is_active {
            self.is_active = false;
            self.active_ms += (now - self.last_active_start).max(0);
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Current reading; does not change the accumulator
    pub fn reading(&self, now: i64) -> TimeOnPageData {
        let active_time = if self.is_active {
            self.active_ms + (now - self.last_active_start).max(0)
        } else {
            self.active_ms
        };
        let total_time = (now - self.page_load_at).max(0);

        TimeOnPageData {
            total_time,
            active_time,
            idle_time: total_time - active_time,
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_idle_accumulate() {
        let mut top = TimeOnPage::new(0);
        top.mark_idle(1_000);
        top.mark_idle(1_500); // already idle
        top.mark_active(3_000);

        let reading = top.reading(4_000);
        assert_eq!(reading.total_time, 4_000);
        assert_eq!(reading.active_time, 2_000);
        assert_eq!(reading.idle_time, 2_000);
        assert_eq!(reading.timestamp, 4_000);
    }

    #[test]
    fn test_reading_while_idle() {
        let mut top = TimeOnPage::new(100);
        top.mark_idle(600);
        let reading = top.reading(10_100);
        assert_eq!(reading.active_time, 500);
        assert_eq!(reading.idle_time, 9_500);
        assert!(!top.is_active());
    }
}
