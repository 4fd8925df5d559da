use std::time::Duration;

/// Per-site sweep counters. Observability only; nothing branches on them.
#[derive(Debug, Clone, Default)]
pub struct SiteReport {
    pub site: String,
    pub checked: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub tombstoned: usize,
    pub forbidden: usize,
    pub elapsed: Duration,
}

impl SiteReport {
    pub fn new(site: &str) -> Self {
        Self {
            site: site.to_string(),
            ..Default::default()
        }
    }

    pub fn pages_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.checked as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub sites: Vec<SiteReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn total<F>(&self, field: F) -> usize
    where
        F: Fn(&SiteReport) -> usize,
    {
        self.sites.iter().map(field).sum()
    }
}
