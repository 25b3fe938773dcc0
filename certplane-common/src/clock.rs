use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// All time reads in the reconciliation loops go through this trait so
/// tests can drive retention and backoff windows deterministically.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to.
pub struct FakeClock {
  now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    FakeClock {
      now: Mutex::new(start),
    }
  }

  pub fn advance(&self, duration: Duration) {
    let mut now = self.now.lock().unwrap();
    *now += duration;
  }

  pub fn set(&self, instant: DateTime<Utc>) {
    *self.now.lock().unwrap() = instant;
  }
}

impl Clock for FakeClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }
}
