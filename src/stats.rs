use std::time::Instant;

/// Per-session frame counters, owned by the read loop.
#[derive(Debug, Clone)]
pub struct Stats {
    pub bytes: u64,
    pub ok: u64,
    pub bad: u64,
    pub checksum: u64,
    pub unknown: u64,
    pub suppressed: u64,
    pub responded: u64,
    t0: Instant,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            bytes: 0,
            ok: 0,
            bad: 0,
            checksum: 0,
            unknown: 0,
            suppressed: 0,
            responded: 0,
            t0: Instant::now(),
        }
    }
    pub fn add_bytes(&mut self, n: usize) {
        self.bytes += n as u64;
    }
    pub fn inc_ok(&mut self) {
        self.ok += 1;
    }
    pub fn inc_bad(&mut self) {
        self.bad += 1;
    }
    pub fn inc_checksum(&mut self) {
        self.checksum += 1;
    }
    pub fn inc_unknown(&mut self) {
        self.unknown += 1;
    }
    pub fn inc_suppressed(&mut self) {
        self.suppressed += 1;
    }
    pub fn inc_responded(&mut self) {
        self.responded += 1;
    }

    pub fn summary(&self) -> String {
        format!(
            "session: ok={} bad={} checksum={} unknown={} suppressed={} responded={} bytes={} over {:.1}s",
            self.ok,
            self.bad,
            self.checksum,
            self.unknown,
            self.suppressed,
            self.responded,
            self.bytes,
            self.t0.elapsed().as_secs_f64(),
        )
    }
}
