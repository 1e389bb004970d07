use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dns_types::protocol::types::*;

/// Why a lookup gave nothing usable.  Either way, the answer has to
/// come from upstream.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CacheError {
    /// Nothing is known about this name and type.
    Miss,
    /// Something is known, but it has expired.
    Drop,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CacheError::Miss => write!(f, "not in cache"),
            CacheError::Drop => write!(f, "cached entry is no longer usable"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// The result of looking up a single record type.
///
/// The negative variants carry the SOA record of the zone which
/// produced them, with its TTL counting down like any other record.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Lookup {
    /// A live rrset.  `ttl` is the smallest TTL in the set.
    Entry {
        ttl: u32,
        rrs: Vec<ResourceRecord>,
    },
    NoDomain(ResourceRecord),
    NoData(ResourceRecord),
    ServFail(ResourceRecord),
}

/// Like `Lookup`, but the name may turn out to be an alias.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AliasLookup {
    Entry {
        ttl: u32,
        rrs: Vec<ResourceRecord>,
    },
    Alias {
        ttl: u32,
        target: DomainName,
    },
    NoDomain(ResourceRecord),
    NoData(ResourceRecord),
    ServFail(ResourceRecord),
}

impl From<Lookup> for AliasLookup {
    fn from(lookup: Lookup) -> Self {
        match lookup {
            Lookup::Entry { ttl, rrs } => AliasLookup::Entry { ttl, rrs },
            Lookup::NoDomain(soa) => AliasLookup::NoDomain(soa),
            Lookup::NoData(soa) => AliasLookup::NoData(soa),
            Lookup::ServFail(soa) => AliasLookup::ServFail(soa),
        }
    }
}

/// The result of looking up every record type for a name.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AnyLookup {
    Entries(BTreeMap<RecordType, Vec<ResourceRecord>>),
    NoDomain(ResourceRecord),
}

/// What the resolver needs from a cache.
///
/// Lookups take `&mut self` because reading may update bookkeeping,
/// such as the access times used for eviction.  Returned TTLs are
/// relative to `now`.
pub trait Cache {
    fn get(
        &mut self,
        now: Instant,
        name: &DomainName,
        rtype: RecordType,
    ) -> Result<Lookup, CacheError>;

    /// Like `get`, but a live CNAME at `name` takes precedence over
    /// the requested type, and is returned as `AliasLookup::Alias`.
    fn get_or_alias(
        &mut self,
        now: Instant,
        name: &DomainName,
        rtype: RecordType,
    ) -> Result<AliasLookup, CacheError>;

    fn get_any(&mut self, now: Instant, name: &DomainName) -> Result<AnyLookup, CacheError>;
}

/// A convenience wrapper around an `InMemoryCache` which lets it be
/// shared between threads.
///
/// Invoking `clone` on a `SharedCache` gives a new instance which
/// refers to the same underlying `InMemoryCache` object.  The lock is
/// held for one operation at a time, so two lookups made while
/// answering one query may see different states.
#[derive(Debug, Clone)]
pub struct SharedCache {
    cache: Arc<Mutex<InMemoryCache>>,
}

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] cache mutex poisoned, cannot recover from this - aborting";

impl SharedCache {
    /// Make a new, empty, shared cache.
    pub fn new() -> Self {
        SharedCache {
            cache: Arc::new(Mutex::new(InMemoryCache::new())),
        }
    }

    /// Create a new cache with the given desired size.
    pub fn with_desired_size(desired_size: usize) -> Self {
        SharedCache {
            cache: Arc::new(Mutex::new(InMemoryCache::with_desired_size(desired_size))),
        }
    }

    /// Insert an entry into the cache.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn insert(&self, now: Instant, record: &ResourceRecord) {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .insert(now, record);
    }

    /// Insert multiple entries into the cache, locking it just once.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn insert_all(&self, now: Instant, records: &[ResourceRecord]) {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .insert_all(now, records);
    }

    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn insert_name_error(&self, now: Instant, name: &DomainName, soa: &ResourceRecord) {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .insert_name_error(now, name, soa);
    }

    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn insert_no_data(
        &self,
        now: Instant,
        name: &DomainName,
        rtype: RecordType,
        soa: &ResourceRecord,
    ) {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .insert_no_data(now, name, rtype, soa);
    }

    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn insert_server_failure(
        &self,
        now: Instant,
        name: &DomainName,
        rtype: RecordType,
        soa: &ResourceRecord,
    ) {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .insert_server_failure(now, name, rtype, soa);
    }

    /// Atomically clears expired entries and, if the cache has grown
    /// beyond its desired size, prunes entries to get down to size.
    ///
    /// Returns `(has overflowed?, current size, num expired, num pruned)`.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn prune(&self, now: Instant) -> (bool, usize, usize, usize) {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).prune(now)
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for SharedCache {
    fn get(
        &mut self,
        now: Instant,
        name: &DomainName,
        rtype: RecordType,
    ) -> Result<Lookup, CacheError> {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .get(now, name, rtype)
    }

    fn get_or_alias(
        &mut self,
        now: Instant,
        name: &DomainName,
        rtype: RecordType,
    ) -> Result<AliasLookup, CacheError> {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .get_or_alias(now, name, rtype)
    }

    fn get_any(&mut self, now: Instant, name: &DomainName) -> Result<AnyLookup, CacheError> {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .get_any(now, name)
    }
}

/// Caching for `ResourceRecord`s and for negative answers.
///
/// You probably want to use `SharedCache` if more than one task needs
/// the cache.
#[derive(Debug, Clone)]
pub struct InMemoryCache {
    inner: PartitionedCache<DomainName, Slot, Entry>,
}

/// Where an entry lives within a domain's partition.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum Slot {
    /// Facts about the whole name: an NXDOMAIN.
    Name,
    /// Facts about one record type.
    Type(RecordType),
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum Entry {
    Record(RecordTypeWithData),
    NameError(ResourceRecord),
    NoData(ResourceRecord),
    ServFail(ResourceRecord),
}

impl Entry {
    fn is_negative(&self) -> bool {
        match self {
            Entry::Record(_) => false,
            Entry::NameError(_) | Entry::NoData(_) | Entry::ServFail(_) => true,
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    /// Create a new cache with a default desired size.
    pub fn new() -> Self {
        Self {
            inner: PartitionedCache::new(),
        }
    }

    /// Create a new cache with the given desired size.
    ///
    /// The `prune` method will remove expired entries, and also enough entries
    /// (in least-recently-used order) to get down to this size.
    pub fn with_desired_size(desired_size: usize) -> Self {
        Self {
            inner: PartitionedCache::with_desired_size(desired_size),
        }
    }

    /// Insert an RR into the cache.  Records with a TTL of zero are
    /// skipped.
    ///
    /// Any cached NXDOMAIN for the name, or negative answer for the
    /// record type, is removed: this record contradicts it.
    ///
    /// This may make the cache grow beyond the desired size.
    pub fn insert(&mut self, now: Instant, record: &ResourceRecord) {
        if record.ttl == 0 {
            return;
        }

        let rtype = record.rtype_with_data.rtype();
        self.evict_negative(&record.name, Slot::Name);
        self.evict_negative(&record.name, Slot::Type(rtype));
        self.inner.upsert(
            now,
            record.name.clone(),
            Slot::Type(rtype),
            Entry::Record(record.rtype_with_data.clone()),
            Duration::from_secs(record.ttl.into()),
        );
    }

    /// Insert multiple RRs into the cache.
    pub fn insert_all(&mut self, now: Instant, records: &[ResourceRecord]) {
        for record in records {
            self.insert(now, record);
        }
    }

    /// Record that `name` does not exist.
    ///
    /// The entry lives for the smaller of the SOA record's TTL and
    /// its MINIMUM field (RFC 2308 section 5).  While it is live,
    /// every lookup of `name` is an NXDOMAIN.
    pub fn insert_name_error(&mut self, now: Instant, name: &DomainName, soa: &ResourceRecord) {
        let ttl = negative_ttl(soa);
        if ttl == 0 {
            return;
        }

        self.inner.remove(name, &Slot::Name);
        self.inner.upsert(
            now,
            name.clone(),
            Slot::Name,
            Entry::NameError(soa.clone()),
            Duration::from_secs(ttl.into()),
        );
    }

    /// Record that `name` exists but has no records of type `rtype`.
    /// This replaces whatever was cached for that type.
    pub fn insert_no_data(
        &mut self,
        now: Instant,
        name: &DomainName,
        rtype: RecordType,
        soa: &ResourceRecord,
    ) {
        let ttl = negative_ttl(soa);
        if ttl == 0 {
            return;
        }

        self.inner.remove(name, &Slot::Name);
        self.inner.remove(name, &Slot::Type(rtype));
        self.inner.upsert(
            now,
            name.clone(),
            Slot::Type(rtype),
            Entry::NoData(soa.clone()),
            Duration::from_secs(ttl.into()),
        );
    }

    /// Record that upstream failed to answer for `name` and `rtype`.
    /// This replaces whatever was cached for that type.
    pub fn insert_server_failure(
        &mut self,
        now: Instant,
        name: &DomainName,
        rtype: RecordType,
        soa: &ResourceRecord,
    ) {
        let ttl = negative_ttl(soa);
        if ttl == 0 {
            return;
        }

        self.inner.remove(name, &Slot::Type(rtype));
        self.inner.upsert(
            now,
            name.clone(),
            Slot::Type(rtype),
            Entry::ServFail(soa.clone()),
            Duration::from_secs(ttl.into()),
        );
    }

    /// Clear expired entries and, if the cache has grown beyond its desired
    /// size, prunes domains to get down to size.
    ///
    /// Returns `(has overflowed?, current size, num expired, num pruned)`.
    pub fn prune(&mut self, now: Instant) -> (bool, usize, usize, usize) {
        self.inner.prune(now)
    }

    /// Helper for `insert`: drops a slot if it holds a negative entry.
    fn evict_negative(&mut self, name: &DomainName, slot: Slot) {
        let contradicted = self
            .inner
            .peek(name, &slot)
            .is_some_and(|tuples| tuples.iter().any(|(entry, _)| entry.is_negative()));
        if contradicted {
            self.inner.remove(name, &slot);
        }
    }

    /// The unexpired entries of a slot, with their remaining TTLs.
    fn live(
        &mut self,
        now: Instant,
        name: &DomainName,
        slot: Slot,
    ) -> Result<Vec<(Entry, u32)>, CacheError> {
        let tuples = self.inner.get(now, name, &slot).ok_or(CacheError::Miss)?;
        let live = tuples
            .iter()
            .filter(|(_, expires)| *expires > now)
            .map(|(entry, expires)| (entry.clone(), remaining_ttl(now, *expires)))
            .collect::<Vec<_>>();

        if live.is_empty() {
            Err(CacheError::Drop)
        } else {
            Ok(live)
        }
    }

    /// The SOA of a live NXDOMAIN for `name`, if there is one.
    fn name_error(&mut self, now: Instant, name: &DomainName) -> Option<ResourceRecord> {
        let live = self.live(now, name, Slot::Name).ok()?;
        live.into_iter().find_map(|(entry, ttl)| match entry {
            Entry::NameError(soa) => Some(with_ttl(soa, ttl)),
            Entry::Record(_) | Entry::NoData(_) | Entry::ServFail(_) => None,
        })
    }
}

impl Cache for InMemoryCache {
    fn get(
        &mut self,
        now: Instant,
        name: &DomainName,
        rtype: RecordType,
    ) -> Result<Lookup, CacheError> {
        if let Some(soa) = self.name_error(now, name) {
            return Ok(Lookup::NoDomain(soa));
        }

        let live = self.live(now, name, Slot::Type(rtype))?;
        let mut min_ttl = u32::MAX;
        let mut rrs = Vec::with_capacity(live.len());
        for (entry, ttl) in live {
            match entry {
                Entry::Record(rtype_with_data) => {
                    min_ttl = min_ttl.min(ttl);
                    rrs.push(ResourceRecord {
                        name: name.clone(),
                        rtype_with_data,
                        rclass: RecordClass::IN,
                        ttl,
                    });
                }
                // negative entries replace the whole slot, so these
                // are the only entry
                Entry::NameError(soa) => return Ok(Lookup::NoDomain(with_ttl(soa, ttl))),
                Entry::NoData(soa) => return Ok(Lookup::NoData(with_ttl(soa, ttl))),
                Entry::ServFail(soa) => return Ok(Lookup::ServFail(with_ttl(soa, ttl))),
            }
        }

        Ok(Lookup::Entry { ttl: min_ttl, rrs })
    }

    fn get_or_alias(
        &mut self,
        now: Instant,
        name: &DomainName,
        rtype: RecordType,
    ) -> Result<AliasLookup, CacheError> {
        if let Some(soa) = self.name_error(now, name) {
            return Ok(AliasLookup::NoDomain(soa));
        }

        match self.live(now, name, Slot::Type(RecordType::CNAME)) {
            Ok(live) => {
                for (entry, ttl) in live {
                    if let Entry::Record(RecordTypeWithData::CNAME { cname }) = entry {
                        return Ok(AliasLookup::Alias { ttl, target: cname });
                    }
                }
            }
            Err(CacheError::Miss | CacheError::Drop) => (),
        }

        self.get(now, name, rtype).map(AliasLookup::from)
    }

    fn get_any(&mut self, now: Instant, name: &DomainName) -> Result<AnyLookup, CacheError> {
        if let Some(soa) = self.name_error(now, name) {
            return Ok(AnyLookup::NoDomain(soa));
        }

        let slots = self
            .inner
            .get_partition(now, name)
            .ok_or(CacheError::Miss)?;

        let mut entries: BTreeMap<RecordType, Vec<ResourceRecord>> = BTreeMap::new();
        for tuples in slots.values() {
            for (entry, expires) in tuples {
                if *expires <= now {
                    continue;
                }
                match entry {
                    Entry::Record(rtype_with_data) => {
                        entries
                            .entry(rtype_with_data.rtype())
                            .or_default()
                            .push(ResourceRecord {
                                name: name.clone(),
                                rtype_with_data: rtype_with_data.clone(),
                                rclass: RecordClass::IN,
                                ttl: remaining_ttl(now, *expires),
                            });
                    }
                    Entry::NameError(_) | Entry::NoData(_) | Entry::ServFail(_) => (),
                }
            }
        }

        if entries.is_empty() {
            Err(CacheError::Drop)
        } else {
            Ok(AnyLookup::Entries(entries))
        }
    }
}

/// How long a negative answer may be cached for.
fn negative_ttl(soa: &ResourceRecord) -> u32 {
    match &soa.rtype_with_data {
        RecordTypeWithData::SOA { minimum, .. } => soa.ttl.min(*minimum),
        _ => soa.ttl,
    }
}

fn remaining_ttl(now: Instant, expires: Instant) -> u32 {
    expires
        .saturating_duration_since(now)
        .as_secs()
        .try_into()
        .unwrap_or(u32::MAX)
}

fn with_ttl(mut rr: ResourceRecord, ttl: u32) -> ResourceRecord {
    rr.ttl = ttl;
    rr
}

#[derive(Debug, Clone)]
pub struct PartitionedCache<K1: Eq + Hash, K2: Eq + Hash, V> {
    /// Cached entries, indexed by partition key.
    partitions: HashMap<K1, Partition<K2, V>>,

    /// Priority queue of partition keys ordered by access times.
    ///
    /// When the cache is full and there are no expired records to prune,
    /// partitions will instead be pruned in LRU order.
    ///
    /// INVARIANT: the keys in here are exactly the keys in `partitions`.
    access_priority: PriorityQueue<K1, Reverse<Instant>>,

    /// Priority queue of partition keys ordered by expiry time.
    ///
    /// When the cache is pruned, expired records are removed first.
    ///
    /// INVARIANT: the keys in here are exactly the keys in `partitions`.
    expiry_priority: PriorityQueue<K1, Reverse<Instant>>,

    /// The number of records in the cache, across all partitions.
    ///
    /// INVARIANT: this is the sum of the `size` fields of the `partitions`.
    current_size: usize,

    /// The desired maximum number of records in the cache.
    desired_size: usize,
}

/// The cached records for a domain.
#[derive(Debug, Clone, Eq, PartialEq)]
struct Partition<K: Eq + Hash, V> {
    /// The time this partition was last read at.
    last_read: Instant,

    /// When the next record expires.
    ///
    /// INVARIANT: this is the minimum of the expiry times of the `records`.
    next_expiry: Instant,

    /// How many records there are.
    ///
    /// INVARIANT: this is the sum of the vector lengths in `records`.
    size: usize,

    /// The records, further divided by record key.
    ///
    /// INVARIANT: none of the vectors are empty.
    records: HashMap<K, Vec<(V, Instant)>>,
}

impl<K1: Clone + Eq + Hash, K2: Copy + Eq + Hash, V: PartialEq> Default
    for PartitionedCache<K1, K2, V>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K1: Clone + Eq + Hash, K2: Copy + Eq + Hash, V: PartialEq> PartitionedCache<K1, K2, V> {
    /// Create a new cache with a default desired size.
    pub fn new() -> Self {
        Self::with_desired_size(512)
    }

    /// Create a new cache with the given desired size.
    pub fn with_desired_size(desired_size: usize) -> Self {
        Self {
            // `desired_size / 2` is a compromise: most partitions will have
            // more than one record, so `desired_size` would be too big for the
            // `partitions`.
            partitions: HashMap::with_capacity(desired_size / 2),
            access_priority: PriorityQueue::with_capacity(desired_size),
            expiry_priority: PriorityQueue::with_capacity(desired_size),
            current_size: 0,
            desired_size,
        }
    }

    /// Get all records for the given partition key from the cache, along with
    /// their expiration times, and mark the partition as read at `now`.
    ///
    /// These records may have expired if `prune` has not been called recently.
    pub fn get_partition(
        &mut self,
        now: Instant,
        partition_key: &K1,
    ) -> Option<&HashMap<K2, Vec<(V, Instant)>>> {
        if let Some(partition) = self.partitions.get_mut(partition_key) {
            partition.last_read = now;
            self.access_priority
                .change_priority(partition_key, Reverse(partition.last_read));
            return Some(&partition.records);
        }

        None
    }

    /// Get all records for the given partition and record key from the cache,
    /// along with their expiration times, and mark the partition as read at
    /// `now`.
    ///
    /// These records may have expired if `prune` has not been called recently.
    pub fn get(
        &mut self,
        now: Instant,
        partition_key: &K1,
        record_key: &K2,
    ) -> Option<&[(V, Instant)]> {
        if let Some(partition) = self.partitions.get_mut(partition_key) {
            if let Some(tuples) = partition.records.get(record_key) {
                partition.last_read = now;
                self.access_priority
                    .change_priority(partition_key, Reverse(partition.last_read));
                return Some(tuples);
            }
        }

        None
    }

    /// Like `get`, but does not count as a read.
    pub fn peek(&self, partition_key: &K1, record_key: &K2) -> Option<&[(V, Instant)]> {
        self.partitions
            .get(partition_key)
            .and_then(|partition| partition.records.get(record_key))
            .map(Vec::as_slice)
    }

    /// Insert a record into the cache, or reset the expiry time if already
    /// present.
    pub fn upsert(
        &mut self,
        now: Instant,
        partition_key: K1,
        record_key: K2,
        value: V,
        ttl: Duration,
    ) {
        let expiry = now + ttl;
        let tuple = (value, expiry);
        if let Some(partition) = self.partitions.get_mut(&partition_key) {
            if let Some(tuples) = partition.records.get_mut(&record_key) {
                let mut duplicate_expires_at = None;
                for i in 0..tuples.len() {
                    let t = &tuples[i];
                    if t.0 == tuple.0 {
                        duplicate_expires_at = Some(t.1);
                        tuples.swap_remove(i);
                        break;
                    }
                }

                tuples.push(tuple);

                if let Some(dup_expiry) = duplicate_expires_at {
                    partition.size -= 1;
                    self.current_size -= 1;

                    if dup_expiry == partition.next_expiry {
                        partition.next_expiry = min_expiry(&partition.records).unwrap_or(expiry);
                        self.expiry_priority
                            .change_priority(&partition_key, Reverse(partition.next_expiry));
                    }
                }
            } else {
                partition.records.insert(record_key, vec![tuple]);
            }
            partition.last_read = now;
            partition.size += 1;
            self.access_priority
                .change_priority(&partition_key, Reverse(partition.last_read));
            if expiry < partition.next_expiry {
                partition.next_expiry = expiry;
                self.expiry_priority
                    .change_priority(&partition_key, Reverse(partition.next_expiry));
            }
        } else {
            let mut records = HashMap::new();
            records.insert(record_key, vec![tuple]);
            let partition = Partition {
                last_read: now,
                next_expiry: expiry,
                size: 1,
                records,
            };
            self.access_priority
                .push(partition_key.clone(), Reverse(partition.last_read));
            self.expiry_priority
                .push(partition_key.clone(), Reverse(partition.next_expiry));
            self.partitions.insert(partition_key, partition);
        }

        self.current_size += 1;
    }

    /// Delete every record under the given partition and record key,
    /// expired or not.  The partition goes too if nothing is left in it.
    ///
    /// Returns the number of records deleted.
    pub fn remove(&mut self, partition_key: &K1, record_key: &K2) -> usize {
        let Some(partition) = self.partitions.get_mut(partition_key) else {
            return 0;
        };
        let Some(tuples) = partition.records.remove(record_key) else {
            return 0;
        };

        let removed = tuples.len();
        partition.size -= removed;
        self.current_size -= removed;

        if let Some(next_expiry) = min_expiry(&partition.records) {
            partition.next_expiry = next_expiry;
            self.expiry_priority
                .change_priority(partition_key, Reverse(next_expiry));
        } else {
            self.partitions.remove(partition_key);
            self.access_priority.remove(partition_key);
            self.expiry_priority.remove(partition_key);
        }

        removed
    }

    /// Delete all records which have expired by `now`.
    ///
    /// Returns the number of records deleted.
    pub fn remove_expired(&mut self, now: Instant) -> usize {
        let mut pruned = 0;

        loop {
            let before = pruned;
            pruned += self.remove_expired_step(now);
            if before == pruned {
                break;
            }
        }

        pruned
    }

    /// Delete all expired records, and then enough
    /// least-recently-used records to reduce the cache to the desired
    /// size.
    ///
    /// Returns `(has overflowed?, current size, num expired, num pruned)`.
    pub fn prune(&mut self, now: Instant) -> (bool, usize, usize, usize) {
        let has_overflowed = self.current_size > self.desired_size;
        let num_expired = self.remove_expired(now);
        let mut num_pruned = 0;

        while self.current_size > self.desired_size {
            num_pruned += self.remove_least_recently_used();
        }

        (has_overflowed, self.current_size, num_expired, num_pruned)
    }

    /// Helper for `remove_expired`: looks at the next-to-expire
    /// domain and cleans up expired records from it.  This may delete
    /// more than one record, and may even delete the whole domain.
    ///
    /// Returns the number of records removed.
    fn remove_expired_step(&mut self, now: Instant) -> usize {
        if let Some((partition_key, Reverse(expiry))) = self.expiry_priority.pop() {
            if expiry > now {
                self.expiry_priority.push(partition_key, Reverse(expiry));
                return 0;
            }

            if let Some(partition) = self.partitions.get_mut(&partition_key) {
                let mut pruned = 0;
                for tuples in partition.records.values_mut() {
                    let len = tuples.len();
                    tuples.retain(|(_, expiry)| expiry > &now);
                    pruned += len - tuples.len();
                }
                partition.records.retain(|_, tuples| !tuples.is_empty());
                partition.size -= pruned;

                if let Some(ne) = min_expiry(&partition.records) {
                    partition.next_expiry = ne;
                    self.expiry_priority.push(partition_key, Reverse(ne));
                } else {
                    self.partitions.remove(&partition_key);
                    self.access_priority.remove(&partition_key);
                }

                self.current_size -= pruned;
                pruned
            } else {
                self.access_priority.remove(&partition_key);
                0
            }
        } else {
            0
        }
    }

    /// Helper for `prune`: deletes all records associated with the
    /// least recently used domain.
    ///
    /// Returns the number of records removed.
    fn remove_least_recently_used(&mut self) -> usize {
        if let Some((partition_key, _)) = self.access_priority.pop() {
            self.expiry_priority.remove(&partition_key);

            if let Some(partition) = self.partitions.remove(&partition_key) {
                let pruned = partition.size;
                self.current_size -= pruned;
                pruned
            } else {
                0
            }
        } else {
            0
        }
    }
}

/// The earliest expiry time in a partition, or `None` if it is empty.
fn min_expiry<K, V>(records: &HashMap<K, Vec<(V, Instant)>>) -> Option<Instant> {
    records
        .values()
        .flat_map(|tuples| tuples.iter().map(|(_, expiry)| *expiry))
        .min()
}
