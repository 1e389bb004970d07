/// Metrics from a resolution attempt.  The resolver builds this
/// structure rather than updating any global counters: it is up to
/// the caller what to do with it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Metrics {
    /// Cache lookups which gave a positive answer or an alias.
    pub cache_hits: u64,
    /// Cache lookups which found nothing usable.
    pub cache_misses: u64,
    /// Cache lookups which gave a cached NXDOMAIN, NODATA, or
    /// SERVFAIL.
    pub negative_hits: u64,
    /// CNAMEs followed while chasing an alias.
    pub cname_hops: u64,
    /// Alias chains which turned out to be cyclic.
    pub cname_loops: u64,
    /// Times the nearest-server search moved up to a parent zone.
    pub zone_ascents: u64,
    /// Times resolution had to find a nameserver's address first.
    pub glue_redirects: u64,
    /// Times the search bottomed out at the root hints.
    pub root_fallbacks: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            cache_hits: 0,
            cache_misses: 0,
            negative_hits: 0,
            cname_hops: 0,
            cname_loops: 0,
            zone_ascents: 0,
            glue_redirects: 0,
            root_fallbacks: 0,
        }
    }

    pub fn cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    pub fn cache_miss(&mut self) {
        self.cache_misses += 1;
    }

    pub fn negative_hit(&mut self) {
        self.negative_hits += 1;
    }

    pub fn cname_hop(&mut self) {
        self.cname_hops += 1;
    }

    pub fn cname_loop(&mut self) {
        self.cname_loops += 1;
    }

    pub fn zone_ascent(&mut self) {
        self.zone_ascents += 1;
    }

    pub fn glue_redirect(&mut self) {
        self.glue_redirects += 1;
    }

    pub fn root_fallback(&mut self) {
        self.root_fallbacks += 1;
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
