//! The synode-keyed machine cache.

use tracing::{debug, info, warn};

use conclave_core::{ConclaveError, GroupEnv, Synode};
use conclave_paxos::PaxMachine;

use crate::config::{CacheConfig, UNLIMITED};
use crate::lru::{LruList, Slot, SlotIdx, NIL};
use crate::shard::HashShard;

/// The message cache: a sharded, hash-indexed, LRU-ordered, size- and
/// count-bounded pool of per-synode state machines.
///
/// All formerly process-wide state — slot arena, LRU lists, hash shards,
/// byte/occupancy counters, the eviction watermark — lives in this one
/// context object with an explicit [`new`](Cache::new)/[`shutdown`](Cache::shutdown)
/// lifecycle.
///
/// # Invariants
///
/// - A synode maps to at most one live machine.
/// - `occupation() <= length()`; reaching equality grows the arena by one
///   batch.
/// - The eviction watermark ([`last_removed`](Cache::last_removed)) only
///   moves forward within a group.
/// - A machine whose advisory lock is held is never evicted or re-keyed.
#[derive(Debug)]
pub struct Cache<E: GroupEnv> {
    config: CacheConfig,
    env: E,
    slots: Vec<Slot>,
    vacant: Vec<SlotIdx>,
    probation: LruList,
    protected: LruList,
    shards: Vec<HashShard>,
    occupation: usize,
    length: usize,
    total_size: u64,
    last_removed: Synode,
    highest_msgno: u64,
    shut_down: bool,
}

impl<E: GroupEnv> Cache<E> {
    /// Create a cache with one batch of free slots and the catch-all
    /// shard.
    pub fn new(config: CacheConfig, env: E) -> Result<Self, ConclaveError> {
        config.validate()?;
        let increment = config.increment;
        let mut cache = Self {
            config,
            env,
            slots: Vec::with_capacity(increment),
            vacant: Vec::new(),
            probation: LruList::new(),
            protected: LruList::new(),
            shards: vec![HashShard::new(0, increment)],
            occupation: 0,
            length: 0,
            total_size: 0,
            last_removed: Synode::NULL,
            highest_msgno: 0,
            shut_down: false,
        };
        cache.provision_slots(increment);
        Ok(cache)
    }

    /// Release everything the cache holds and report shutdown to the
    /// instrumentation hook. Runs once; also invoked from `Drop`.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        while let Some(idx) = self.protected.pop_back(&mut self.slots) {
            self.sub_size_idx(idx);
            self.hash_out(idx);
        }
        while self.probation.pop_back(&mut self.slots).is_some() {}
        self.slots.clear();
        self.vacant.clear();
        self.shards.clear();
        self.occupation = 0;
        self.length = 0;
        self.total_size = 0;
        self.env.cache_shutdown();
        self.shut_down = true;
        info!("message cache shut down");
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Non-creating lookup: the machine for `synode`, promoted to most
    /// recently used, or `None` if not cached. Never claims a slot.
    pub fn get(&mut self, synode: &Synode) -> Option<&mut PaxMachine> {
        let idx = self.lookup(synode)?;
        self.promote(idx);
        Some(&mut self.slots[idx as usize].machine)
    }

    /// Resolve `synode` to its machine, claiming and re-keying a slot on
    /// a miss.
    ///
    /// An entry that is already cached is returned *without* promotion.
    /// On a miss, a slot comes from the free list or from reclaiming the
    /// least-recently-used non-busy machine whose round is provably
    /// delivered; with `force`, delivery status is waived (memory-pressure
    /// paths only). Returns `None` when no slot can be claimed — the
    /// caller backs off, the cache never retries internally.
    pub fn get_no_touch(&mut self, synode: &Synode, force: bool) -> Option<&mut PaxMachine> {
        let idx = self.resolve(synode, force)?;
        Some(&mut self.slots[idx as usize].machine)
    }

    /// Forcing resolve for paths that must not fail: like
    /// [`get_no_touch`](Cache::get_no_touch) with `force`, plus
    /// promotion.
    ///
    /// # Errors
    ///
    /// [`ConclaveError::CacheExhausted`] when every candidate slot is
    /// locked. That is resource exhaustion, not a normal miss.
    pub fn force_get(&mut self, synode: &Synode) -> Result<&mut PaxMachine, ConclaveError> {
        match self.resolve(synode, true) {
            Some(idx) => {
                self.promote(idx);
                Ok(&mut self.slots[idx as usize].machine)
            }
            None => {
                warn!(synode = %synode, "cache exhausted: all slots busy");
                Err(ConclaveError::CacheExhausted { synode: *synode })
            }
        }
    }

    /// Whether `synode`'s slot has definitely been evicted: any request
    /// for it is "too old, not available" rather than "not yet seen".
    ///
    /// True iff the synode's group matches the eviction watermark's group
    /// and the synode is not strictly above the watermark.
    pub fn was_removed(&self, synode: &Synode) -> bool {
        if self.last_removed.is_null() {
            return false;
        }
        match synode.partial_cmp(&self.last_removed) {
            // Differing groups are not comparable: treated as not removed.
            None => false,
            Some(std::cmp::Ordering::Greater) => false,
            Some(_) => true,
        }
    }

    // =========================================================================
    // Size accounting
    // =========================================================================

    /// Add the payload footprint of `synode`'s machine to the running
    /// total.
    ///
    /// Call after attaching messages to a machine obtained from the
    /// cache; [`update`](Cache::update) brackets both sides for you.
    pub fn add_size(&mut self, synode: &Synode) {
        if let Some(idx) = self.lookup(synode) {
            self.add_size_idx(idx);
        }
    }

    /// Subtract the payload footprint of `synode`'s machine from the
    /// running total. Call *before* detaching or replacing messages.
    pub fn sub_size(&mut self, synode: &Synode) {
        if let Some(idx) = self.lookup(synode) {
            self.sub_size_idx(idx);
        }
    }

    /// Run `f` against `synode`'s machine with byte accounting bracketed
    /// around it: the machine's footprint is subtracted before `f` and
    /// re-added after, so whatever `f` attaches or releases is counted.
    pub fn update<R>(
        &mut self,
        synode: &Synode,
        f: impl FnOnce(&mut PaxMachine) -> R,
    ) -> Option<R> {
        let idx = self.lookup(synode)?;
        self.sub_size_idx(idx);
        let result = f(&mut self.slots[idx as usize].machine);
        self.add_size_idx(idx);
        Some(result)
    }

    /// Whether a byte limit is configured and currently exceeded.
    pub fn above_limit(&self) -> bool {
        self.config.cache_limit != UNLIMITED && self.total_size > self.config.cache_limit
    }

    /// Install a new byte limit, returning the previous one. Shrinks
    /// immediately if the cache is now over the limit.
    pub fn set_max_size(&mut self, bytes: u64) -> u64 {
        let previous = std::mem::replace(&mut self.config.cache_limit, bytes);
        if self.above_limit() {
            self.shrink();
        }
        previous
    }

    // =========================================================================
    // Eviction and capacity
    // =========================================================================

    /// Enforce the byte limit: scan the protected list from its
    /// least-recently-used end, evicting machines that are not busy and
    /// whose rounds are provably delivered everywhere, until the cache is
    /// back under the limit, the batch bound (`size_decrement`) is hit,
    /// or no candidate remains. Returns the number evicted.
    pub fn shrink(&mut self) -> usize {
        let mut evicted = 0;
        let mut idx = self.protected.tail();
        while idx != NIL && evicted < self.config.size_decrement && self.above_limit() {
            let prev = self.slots[idx as usize].lru_prev;
            let machine = &self.slots[idx as usize].machine;
            if !machine.is_busy() && self.can_deallocate(machine) {
                self.evict(idx);
                evicted += 1;
            }
            idx = prev;
        }
        if evicted > 0 {
            debug!(
                evicted,
                size = self.total_size,
                occupation = self.occupation,
                "shrink pass"
            );
        }
        evicted
    }

    /// Consider giving a batch of slots back after sustained low
    /// occupancy. Returns whether a batch was released.
    ///
    /// This is the slow, hysteresis-guarded rebalancing — distinct from
    /// the byte-driven [`shrink`](Cache::shrink). A batch is released
    /// only when all of the following hold: the arena is above the
    /// decrease threshold, the oldest shard has fully drained (and is
    /// dropped along with the batch), occupancy is low and would still
    /// fit comfortably after the decrease, and byte usage is not still
    /// ramping toward the configured limit.
    pub fn check_decrease(&mut self) -> bool {
        let batch = self.config.increment;
        if self.length <= self.config.dec_threshold_length || self.length < batch {
            return false;
        }
        if self.shards.len() <= 1 || self.shards[0].occupied != 0 {
            return false;
        }
        let occupation = self.occupation as f64;
        if occupation >= self.config.min_target_occupation * self.length as f64 {
            return false;
        }
        if occupation > self.config.min_length_threshold * (self.length - batch) as f64 {
            return false;
        }
        if self.config.cache_limit != UNLIMITED
            && self.total_size as f64
                >= self.config.dec_threshold_size * self.config.cache_limit as f64
        {
            return false;
        }
        if self.probation.len() < batch {
            return false;
        }

        for _ in 0..batch {
            let idx = self
                .probation
                .pop_back(&mut self.slots)
                .expect("probation length checked above");
            let slot = &mut self.slots[idx as usize];
            slot.machine = PaxMachine::new();
            slot.vacant = true;
            self.vacant.push(idx);
        }
        self.length -= batch;
        self.shards.remove(0);
        info!(
            length = self.length,
            occupation = self.occupation,
            "released a batch of cache slots"
        );
        true
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Number of machines currently hashed (in use).
    pub fn occupation(&self) -> usize {
        self.occupation
    }

    /// Total provisioned slots (in use + free).
    pub fn length(&self) -> usize {
        self.length
    }

    /// Free slots currently on the probation list.
    pub fn free_slots(&self) -> usize {
        self.probation.len()
    }

    /// Payload bytes currently referenced by cached machines.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// High-water mark of evicted synodes (null until the first
    /// eviction).
    pub fn last_removed(&self) -> Synode {
        self.last_removed
    }

    /// Number of hash shards in the stack.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The active configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The environment the cache consults.
    pub fn env(&self) -> &E {
        &self.env
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn provision_slots(&mut self, batch: usize) {
        for _ in 0..batch {
            let idx = match self.vacant.pop() {
                Some(idx) => {
                    self.slots[idx as usize].vacant = false;
                    idx
                }
                None => {
                    self.slots.push(Slot::new());
                    (self.slots.len() - 1) as SlotIdx
                }
            };
            self.probation.push_front(&mut self.slots, idx);
        }
        self.length += batch;
    }

    /// Index of the shard covering `msgno`: newest-first walk, first
    /// shard at or below, catch-all otherwise.
    fn find_shard(&self, msgno: u64) -> usize {
        for (i, shard) in self.shards.iter().enumerate().rev() {
            if shard.start_msgno <= msgno {
                return i;
            }
        }
        0
    }

    fn lookup(&self, synode: &Synode) -> Option<SlotIdx> {
        if self.shards.is_empty() {
            // Shut down; nothing is resolvable.
            return None;
        }
        let shard = &self.shards[self.find_shard(synode.msgno)];
        let mut idx = shard.buckets[shard.bucket_of(synode)];
        while idx != NIL {
            let slot = &self.slots[idx as usize];
            if slot.machine.synode == *synode {
                return Some(idx);
            }
            idx = slot.hash_next;
        }
        None
    }

    fn hash_into(&mut self, idx: SlotIdx) {
        let synode = self.slots[idx as usize].machine.synode;
        let shard_i = self.find_shard(synode.msgno);
        let shard = &mut self.shards[shard_i];
        let bucket = shard.bucket_of(&synode);
        let head = shard.buckets[bucket];

        let slot = &mut self.slots[idx as usize];
        debug_assert!(!slot.hashed, "slot already hashed");
        slot.hash_prev = NIL;
        slot.hash_next = head;
        slot.hashed = true;
        if head != NIL {
            self.slots[head as usize].hash_prev = idx;
        }
        self.shards[shard_i].buckets[bucket] = idx;
        self.shards[shard_i].occupied += 1;
    }

    fn hash_out(&mut self, idx: SlotIdx) {
        if !self.slots[idx as usize].hashed {
            return;
        }
        let synode = self.slots[idx as usize].machine.synode;
        let shard_i = self.find_shard(synode.msgno);

        let (prev, next) = {
            let slot = &mut self.slots[idx as usize];
            let links = (slot.hash_prev, slot.hash_next);
            slot.hash_prev = NIL;
            slot.hash_next = NIL;
            slot.hashed = false;
            links
        };
        if prev != NIL {
            self.slots[prev as usize].hash_next = next;
        } else {
            let bucket = self.shards[shard_i].bucket_of(&synode);
            debug_assert_eq!(self.shards[shard_i].buckets[bucket], idx);
            self.shards[shard_i].buckets[bucket] = next;
        }
        if next != NIL {
            self.slots[next as usize].hash_prev = prev;
        }
        self.shards[shard_i].occupied -= 1;
    }

    /// Promote `idx` to most recently used and stamp its recency clock.
    fn promote(&mut self, idx: SlotIdx) {
        self.protected.unlink(&mut self.slots, idx);
        self.protected.push_front(&mut self.slots, idx);
        let now = self.env.now();
        self.slots[idx as usize].machine.touch(now);
    }

    /// Resolve `synode` to a slot, claiming one on a miss.
    fn resolve(&mut self, synode: &Synode, force: bool) -> Option<SlotIdx> {
        debug_assert!(!synode.is_null(), "resolving the null synode");
        if let Some(idx) = self.lookup(synode) {
            return Some(idx);
        }

        let idx = self.lru_get(force)?;
        let n_nodes = self
            .env
            .find_site(synode)
            .or_else(|| self.env.current_site())
            .map(|site| site.max_nodes())
            .unwrap_or(0);
        self.slots[idx as usize].machine.reset(*synode, n_nodes);
        self.hash_into(idx);
        self.protected.push_front(&mut self.slots, idx);
        self.occupation += 1;
        self.highest_msgno = self.highest_msgno.max(synode.msgno);

        // Out of spare slots: provision another batch, and open a shard
        // for traffic above everything hashed so far. Growth stops while
        // the cache is over its byte budget; from then on misses are
        // served by reclaiming delivered history instead of new memory.
        if self.occupation >= self.length && !self.above_limit() {
            self.expand();
        }
        Some(idx)
    }

    /// Claim a free or reclaimable slot.
    ///
    /// Preference order: the probation free list (O(1)); else the
    /// least-recently-used non-busy protected machine whose round is
    /// provably delivered; else — only with `force` — the
    /// least-recently-used non-busy machine regardless of delivery
    /// status.
    fn lru_get(&mut self, force: bool) -> Option<SlotIdx> {
        if let Some(idx) = self.probation.pop_front(&mut self.slots) {
            return Some(idx);
        }
        if let Some(idx) = self.find_victim(true) {
            return Some(self.reclaim(idx));
        }
        if force {
            if let Some(idx) = self.find_victim(false) {
                debug!("forced reclaim of an undelivered round");
                return Some(self.reclaim(idx));
            }
        }
        None
    }

    fn find_victim(&self, require_delivered: bool) -> Option<SlotIdx> {
        let mut idx = self.protected.tail();
        while idx != NIL {
            let slot = &self.slots[idx as usize];
            if !slot.machine.is_busy()
                && (!require_delivered || self.can_deallocate(&slot.machine))
            {
                return Some(idx);
            }
            idx = slot.lru_prev;
        }
        None
    }

    /// Detach a protected slot from hash and list, advancing the eviction
    /// watermark. The machine itself is reset by the caller.
    fn reclaim(&mut self, idx: SlotIdx) -> SlotIdx {
        let victim = self.slots[idx as usize].machine.synode;
        self.sub_size_idx(idx);
        self.protected.unlink(&mut self.slots, idx);
        self.hash_out(idx);
        self.note_removed(victim);
        self.occupation -= 1;
        debug!(victim = %victim, "reclaimed cache slot");
        idx
    }

    /// Reclaim plus reset-to-null plus return to probation: the shrink
    /// path, which frees the machine's payload immediately.
    fn evict(&mut self, idx: SlotIdx) {
        self.reclaim(idx);
        let capacity = self.slots[idx as usize].machine.nodeset_capacity();
        self.slots[idx as usize].machine.reset(Synode::NULL, capacity);
        self.probation.push_front(&mut self.slots, idx);
    }

    /// Whether evicting `machine` is safe: its site exists, the site's
    /// install grace period has passed, and the machine's round is
    /// strictly behind what every member has delivered. Null-keyed
    /// machines hold nothing and are always reclaimable.
    fn can_deallocate(&self, machine: &PaxMachine) -> bool {
        if machine.synode.is_null() {
            return true;
        }
        let Some(site) = self.env.find_site(&machine.synode) else {
            return false;
        };
        if self.env.now().saturating_sub(site.install_time) < self.config.install_grace {
            return false;
        }
        let min_delivered = self.env.min_delivered_msg(&site);
        if min_delivered.is_null() {
            return false;
        }
        matches!(
            machine.synode.partial_cmp(&min_delivered),
            Some(std::cmp::Ordering::Less)
        )
    }

    /// Advance the eviction watermark past `victim`.
    ///
    /// Within a group the watermark only moves forward; a victim from a
    /// different group (a new epoch) replaces it outright.
    fn note_removed(&mut self, victim: Synode) {
        if victim.is_null() {
            return;
        }
        match victim.partial_cmp(&self.last_removed) {
            None => self.last_removed = victim,
            Some(std::cmp::Ordering::Greater) => self.last_removed = victim,
            Some(_) => {}
        }
    }

    /// Provision one more batch of slots and stack a shard for new
    /// high-numbered traffic.
    fn expand(&mut self) {
        self.provision_slots(self.config.increment);
        // Strictly above every hashed msgno, so existing entries keep
        // resolving to their original shard.
        let start_msgno = self.highest_msgno + 1;
        self.shards
            .push(HashShard::new(start_msgno, self.config.increment));
        info!(
            length = self.length,
            occupation = self.occupation,
            start_msgno,
            "expanded message cache"
        );
    }

    fn add_size_idx(&mut self, idx: SlotIdx) {
        let bytes = self.slots[idx as usize].machine.payload_size();
        if bytes > 0 {
            self.total_size += bytes;
            self.env.payload_added(bytes);
        }
    }

    fn sub_size_idx(&mut self, idx: SlotIdx) {
        let bytes = self.slots[idx as usize].machine.payload_size();
        if bytes > 0 {
            self.total_size = self.total_size.saturating_sub(bytes);
            self.env.payload_freed(bytes);
        }
    }
}

impl<E: GroupEnv> Drop for Cache<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::{InMemoryGroupEnv, NodeAddress, SiteDef};
    use conclave_paxos::app_data::{push, AppData, Payload};
    use conclave_paxos::{MsgRef, PaxMsg};
    use std::time::Duration;

    fn test_env(group: u32) -> InMemoryGroupEnv {
        let env = InMemoryGroupEnv::new();
        env.install_site(SiteDef {
            start: Synode::new(group, 1, 0),
            nodes: vec![
                NodeAddress::new("a:1"),
                NodeAddress::new("b:2"),
                NodeAddress::new("c:3"),
            ],
            this_node: 0,
            install_time: Duration::ZERO,
        });
        env
    }

    fn test_cache() -> (Cache<InMemoryGroupEnv>, InMemoryGroupEnv) {
        let env = test_env(1);
        let cache = Cache::new(CacheConfig::for_testing(), env.clone()).expect("cache");
        (cache, env)
    }

    fn attach_payload(cache: &mut Cache<InMemoryGroupEnv>, synode: &Synode, n_bytes: usize) {
        cache
            .update(synode, |pm| {
                let mut msg = PaxMsg::new(*synode, None);
                push(
                    &mut msg.payload,
                    Box::new(AppData::new(Payload::Data(vec![0u8; n_bytes]))),
                );
                pm.learner.msg = Some(MsgRef::new(msg));
            })
            .expect("machine is cached");
    }

    #[test]
    fn test_init_state() {
        let (cache, _env) = test_cache();
        assert_eq!(cache.length(), 8);
        assert_eq!(cache.occupation(), 0);
        assert_eq!(cache.free_slots(), 8);
        assert_eq!(cache.total_size(), 0);
        assert_eq!(cache.shard_count(), 1);
        assert!(cache.last_removed().is_null());
    }

    #[test]
    fn test_get_never_creates() {
        let (mut cache, _env) = test_cache();
        assert!(cache.get(&Synode::new(1, 5, 0)).is_none());
        assert_eq!(cache.occupation(), 0);
    }

    #[test]
    fn test_get_no_touch_creates_and_keys_machine() {
        let (mut cache, _env) = test_cache();
        let synode = Synode::new(1, 5, 0);

        let pm = cache.get_no_touch(&synode, false).expect("slot available");
        assert_eq!(pm.synode, synode);
        assert_eq!(pm.nodeset_capacity(), 3, "sized to the site");
        assert_eq!(cache.occupation(), 1);

        // Same synode resolves to the same machine, not a second one.
        let again = cache.get_no_touch(&synode, false).expect("hit");
        assert_eq!(again.synode, synode);
        assert_eq!(cache.occupation(), 1);
    }

    #[test]
    fn test_key_uniqueness() {
        let (mut cache, _env) = test_cache();
        // Interleave creating lookups and re-lookups, then verify each
        // synode still resolves to exactly one machine.
        for round in 0..3 {
            for msgno in 1..=6u64 {
                let synode = Synode::new(1, msgno, (msgno % 3) as u32);
                cache.get_no_touch(&synode, false).expect("slot");
                if round > 0 {
                    cache.get(&synode).expect("hit");
                }
            }
        }
        assert_eq!(cache.occupation(), 6);
    }

    #[test]
    fn test_growth_triggers_exactly_at_capacity() {
        let (mut cache, _env) = test_cache();
        let n = cache.config().increment;

        for msgno in 1..n as u64 {
            cache
                .get_no_touch(&Synode::new(1, msgno, 0), false)
                .expect("slot");
            assert_eq!(cache.length(), n, "no growth below capacity");
        }

        cache
            .get_no_touch(&Synode::new(1, n as u64, 0), false)
            .expect("slot");
        assert_eq!(cache.occupation(), n);
        assert_eq!(cache.length(), 2 * n, "one batch added at capacity");
        assert_eq!(cache.shard_count(), 2);

        // Entries hashed before the growth are still found.
        for msgno in 1..=n as u64 {
            assert!(cache.get(&Synode::new(1, msgno, 0)).is_some());
        }
    }

    #[test]
    fn test_new_shard_covers_new_traffic() {
        let (mut cache, _env) = test_cache();
        let n = cache.config().increment as u64;
        for msgno in 1..=n {
            cache
                .get_no_touch(&Synode::new(1, msgno, 0), false)
                .expect("slot");
        }
        assert_eq!(cache.shard_count(), 2);

        // Traffic above the stamp lands in the new shard; old entries
        // stay resolvable.
        cache
            .get_no_touch(&Synode::new(1, 1000, 0), false)
            .expect("slot");
        assert!(cache.get(&Synode::new(1, 1000, 0)).is_some());
        assert!(cache.get(&Synode::new(1, 1, 0)).is_some());
    }

    #[test]
    fn test_was_removed_semantics() {
        let (mut cache, env) = test_cache();
        assert!(
            !cache.was_removed(&Synode::new(1, 1, 0)),
            "nothing evicted yet"
        );

        // Make every machine stale and evictable, then force eviction by
        // filling the cache without letting it grow past its free slots:
        // set a zero byte limit and shrink.
        for msgno in 1..=4u64 {
            cache
                .get_no_touch(&Synode::new(1, msgno, 0), false)
                .expect("slot");
            attach_payload(&mut cache, &Synode::new(1, msgno, 0), 8);
        }
        env.set_min_delivered(Synode::new(1, 100, 0));
        cache.set_max_size(0);

        assert!(cache.was_removed(&Synode::new(1, 1, 0)));
        assert!(cache.was_removed(&Synode::new(1, 2, 0)));
        // At the watermark: removed (not strictly greater).
        let watermark = cache.last_removed();
        assert!(cache.was_removed(&watermark));
        assert!(!cache.was_removed(&Synode::new(1, watermark.msgno + 1, 0)));
        // Other groups are never "removed" here.
        assert!(!cache.was_removed(&Synode::new(9, 1, 0)));
    }

    #[test]
    fn test_eviction_watermark_is_monotonic() {
        let (mut cache, env) = test_cache();
        env.set_min_delivered(Synode::new(1, 1000, 0));
        cache.set_max_size(0);

        let mut previous = Synode::NULL;
        for msgno in 1..=30u64 {
            cache
                .get_no_touch(&Synode::new(1, msgno, 0), false)
                .expect("slot");
            attach_payload(&mut cache, &Synode::new(1, msgno, 0), 4);
            cache.shrink();

            let watermark = cache.last_removed();
            if !previous.is_null() && !watermark.is_null() {
                assert!(
                    watermark.partial_cmp(&previous)
                        != Some(std::cmp::Ordering::Less),
                    "watermark moved backward: {previous} -> {watermark}"
                );
            }
            previous = watermark;
        }
    }

    #[test]
    fn test_shrink_respects_busy_and_delivery() {
        let (mut cache, env) = test_cache();
        for msgno in 1..=3u64 {
            cache
                .get_no_touch(&Synode::new(1, msgno, 0), false)
                .expect("slot");
            attach_payload(&mut cache, &Synode::new(1, msgno, 0), 16);
        }

        // Nothing is provably delivered: shrink must evict nothing.
        cache.set_max_size(0);
        assert_eq!(cache.shrink(), 0);
        assert_eq!(cache.occupation(), 3);

        // Deliver up to msgno 2: only rounds strictly behind are fair game.
        env.set_min_delivered(Synode::new(1, 2, 0));
        let evicted = cache.shrink();
        assert_eq!(evicted, 1, "only msgno 1 is strictly behind the watermark");
        assert!(cache.get(&Synode::new(1, 1, 0)).is_none());
        assert!(cache.get(&Synode::new(1, 2, 0)).is_some());

        // Deliver everything, but lock msgno 2: it must survive.
        env.set_min_delivered(Synode::new(1, 100, 0));
        cache
            .get(&Synode::new(1, 2, 0))
            .expect("machine")
            .lock();
        cache.shrink();
        assert!(cache.get(&Synode::new(1, 2, 0)).is_some(), "locked survives");
        assert!(cache.get(&Synode::new(1, 3, 0)).is_none(), "unlocked evicted");
    }

    #[test]
    fn test_shrink_honors_batch_bound() {
        let (mut cache, env) = test_cache();
        env.set_min_delivered(Synode::new(1, 1000, 0));
        for msgno in 1..=6u64 {
            cache
                .get_no_touch(&Synode::new(1, msgno, 0), false)
                .expect("slot");
            attach_payload(&mut cache, &Synode::new(1, msgno, 0), 16);
        }
        cache.set_max_size(0); // triggers one shrink pass internally
        let after_first = 6 - cache.occupation();
        assert!(
            after_first <= cache.config().size_decrement,
            "at most one batch per pass"
        );
    }

    #[test]
    fn test_shrink_stops_at_limit() {
        let (mut cache, env) = test_cache();
        env.set_min_delivered(Synode::new(1, 1000, 0));
        for msgno in 1..=4u64 {
            cache
                .get_no_touch(&Synode::new(1, msgno, 0), false)
                .expect("slot");
            attach_payload(&mut cache, &Synode::new(1, msgno, 0), 100);
        }
        let size_of_three = cache.total_size() / 4 * 3;
        cache.set_max_size(size_of_three);
        // One eviction brings us under the limit; shrink must then stop.
        assert!(cache.occupation() >= 3);
        assert!(!cache.above_limit());
    }

    #[test]
    fn test_grace_period_blocks_eviction() {
        let env = InMemoryGroupEnv::new();
        env.install_site(SiteDef {
            start: Synode::new(1, 1, 0),
            nodes: vec![NodeAddress::new("a:1")],
            this_node: 0,
            install_time: Duration::ZERO,
        });
        let config = CacheConfig {
            install_grace: Duration::from_secs(5),
            ..CacheConfig::for_testing()
        };
        let mut cache = Cache::new(config, env.clone()).expect("cache");

        cache
            .get_no_touch(&Synode::new(1, 1, 0), false)
            .expect("slot");
        attach_payload(&mut cache, &Synode::new(1, 1, 0), 8);
        env.set_min_delivered(Synode::new(1, 100, 0));

        cache.set_max_size(0);
        assert_eq!(cache.occupation(), 1, "site too young to reclaim from");

        env.advance(Duration::from_secs(6));
        cache.shrink();
        assert_eq!(cache.occupation(), 0, "grace period elapsed");
    }

    #[test]
    fn test_growth_is_gated_by_the_byte_limit() {
        let env = test_env(1);
        let config = CacheConfig {
            cache_limit: 1,
            ..CacheConfig::for_testing()
        };
        let mut cache = Cache::new(config, env).expect("cache");
        let n = cache.config().increment;

        // One payload puts the cache over its (tiny) budget.
        cache
            .get_no_touch(&Synode::new(1, 1, 0), false)
            .expect("slot");
        attach_payload(&mut cache, &Synode::new(1, 1, 0), 64);
        assert!(cache.above_limit());

        // Filling to capacity must not grow the arena now.
        for msgno in 2..=n as u64 {
            cache
                .get_no_touch(&Synode::new(1, msgno, 0), false)
                .expect("slot");
        }
        assert_eq!(cache.occupation(), n);
        assert_eq!(cache.length(), n, "no growth while over the byte limit");
        assert_eq!(cache.free_slots(), 0);
    }

    #[test]
    fn test_forced_reclaim_ignores_delivery_but_not_locks() {
        let env = test_env(1);
        let config = CacheConfig {
            cache_limit: 1,
            ..CacheConfig::for_testing()
        };
        let mut cache = Cache::new(config, env).expect("cache");
        let n = cache.config().increment as u64;

        // Put the cache over its byte budget so it cannot grow, fill
        // every slot, and lock everything.
        cache
            .get_no_touch(&Synode::new(1, 1, 0), false)
            .expect("slot");
        attach_payload(&mut cache, &Synode::new(1, 1, 0), 64);
        for msgno in 2..=n {
            cache
                .get_no_touch(&Synode::new(1, msgno, 0), false)
                .expect("slot");
        }
        for msgno in 1..=n {
            cache.get(&Synode::new(1, msgno, 0)).expect("machine").lock();
        }
        assert_eq!(cache.free_slots(), 0);

        // Nothing delivered, everything locked: even force fails, and
        // the forcing entry point reports exhaustion.
        assert!(cache.get_no_touch(&Synode::new(1, 10 * n, 1), true).is_none());
        assert!(matches!(
            cache.force_get(&Synode::new(1, 10 * n, 1)),
            Err(ConclaveError::CacheExhausted { .. })
        ));

        // Unlock one machine. The delivery watermark is still null, so a
        // plain miss has no safe victim, but force may steal it.
        cache.get(&Synode::new(1, 1, 0)).expect("machine").unlock();
        assert!(cache.get_no_touch(&Synode::new(1, 10 * n, 2), false).is_none());
        let pm = cache.force_get(&Synode::new(1, 10 * n, 1)).expect("forced");
        assert_eq!(pm.synode, Synode::new(1, 10 * n, 1));
        assert!(cache.get(&Synode::new(1, 1, 0)).is_none(), "stolen");
    }

    #[test]
    fn test_update_keeps_byte_accounting_consistent() {
        let (mut cache, _env) = test_cache();
        let synode = Synode::new(1, 5, 0);
        cache.get_no_touch(&synode, false).expect("slot");
        assert_eq!(cache.total_size(), 0);

        attach_payload(&mut cache, &synode, 64);
        let with_payload = cache.total_size();
        assert!(with_payload > 64);

        // Aliasing the same message in another role adds nothing.
        cache
            .update(&synode, |pm| {
                pm.acceptor.msg = pm.learner.msg.clone();
            })
            .expect("cached");
        assert_eq!(cache.total_size(), with_payload);

        // Dropping all messages returns the accounting to zero.
        cache
            .update(&synode, |pm| {
                pm.acceptor.msg = None;
                pm.learner.msg = None;
            })
            .expect("cached");
        assert_eq!(cache.total_size(), 0);
    }

    #[test]
    fn test_check_decrease_requires_all_conditions() {
        let (mut cache, _env) = test_cache();
        let n = cache.config().increment;

        // Grow once: fill to capacity, then empty the cache again.
        for msgno in 1..=n as u64 {
            cache
                .get_no_touch(&Synode::new(1, msgno, 0), false)
                .expect("slot");
        }
        assert_eq!(cache.length(), 2 * n);
        assert_eq!(cache.shard_count(), 2);

        // Occupied: no decrease.
        assert!(!cache.check_decrease());

        // Evict everything (all delivered, limit zero).
        cache.env().set_min_delivered(Synode::new(1, 1000, 0));
        for msgno in 1..=n as u64 {
            attach_payload(&mut cache, &Synode::new(1, msgno, 0), 8);
        }
        let mut guard = 0;
        while cache.occupation() > 0 {
            cache.set_max_size(0);
            guard += 1;
            assert!(guard < 100, "shrink must drain the cache");
        }
        cache.set_max_size(UNLIMITED);

        assert_eq!(cache.shards[0].occupied, 0);
        assert!(cache.check_decrease(), "drained and oversized");
        assert_eq!(cache.length(), n);
        assert_eq!(cache.shard_count(), 1);

        // Below the length threshold now: no further decrease.
        assert!(!cache.check_decrease());
    }

    #[test]
    fn test_shutdown_resets_and_reports() {
        let (mut cache, env) = test_cache();
        cache
            .get_no_touch(&Synode::new(1, 1, 0), false)
            .expect("slot");
        attach_payload(&mut cache, &Synode::new(1, 1, 0), 32);
        assert!(cache.total_size() > 0);

        cache.shutdown();
        assert_eq!(cache.occupation(), 0);
        assert_eq!(cache.length(), 0);
        assert_eq!(cache.total_size(), 0);
        drop(cache);
        let _ = env; // metrics hook is a no-op here; shutdown ran once
    }
}
