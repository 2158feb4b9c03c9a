use std::{
    error::Error,
    fmt,
    ops::Not,
};

use log::{debug, trace, warn};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessResult {
    Hit,
    Miss,
}

impl AccessResult {
    pub fn is_hit(self) -> bool {
        self == AccessResult::Hit
    }
}

/// A physical address split into its block offset, set index and tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub offset: u64,
    pub set: usize,
    pub tag: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSection {
    shift: u32,
    mask: u64,
}

impl BitSection {
    fn apply(&self, num: u64) -> u64 {
        (num >> self.shift) & self.mask
    }
}

/// Rejected cache geometry. The cache the parameters were meant for is left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    NotPowerOfTwo { param: &'static str, value: usize },
    AssocTooLarge { assoc: usize, blocks: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotPowerOfTwo { param, value } => write!(
                f,
                "{param} must be a power of two and greater than zero, got {value}"
            ),
            ConfigError::AssocTooLarge { assoc, blocks } => write!(
                f,
                "associativity {assoc} exceeds the number of blocks ({blocks})"
            ),
        }
    }
}

impl Error for ConfigError {}

/// Validated cache shape and the address bit layout derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    size: usize,
    block_size: usize,
    assoc: usize,
    n_sets: usize,
    offset_sec: BitSection,
    set_sec: BitSection,
    tag_sec: BitSection,
}

impl Geometry {
    pub fn new(size: usize, block_size: usize, assoc: usize) -> Result<Self, ConfigError> {
        for (param, value) in [("size", size), ("block size", block_size), ("assoc", assoc)] {
            if !value.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo { param, value });
            }
        }
        let blocks = size / block_size;
        if assoc > blocks {
            return Err(ConfigError::AssocTooLarge { assoc, blocks });
        }
        let n_sets = blocks / assoc;

        let offset_sec = BitSection {
            shift: 0,
            mask: block_size as u64 - 1,
        };

        let set_shift = block_size.ilog2();
        let set_sec = BitSection {
            shift: set_shift,
            mask: n_sets as u64 - 1,
        };

        let tag_shift = n_sets.ilog2() + set_shift;
        let tag_sec = BitSection {
            shift: tag_shift,
            mask: 0u64.not(),
        };

        Ok(Geometry {
            size,
            block_size,
            assoc,
            n_sets,
            offset_sec,
            set_sec,
            tag_sec,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn assoc(&self) -> usize {
        self.assoc
    }

    pub fn n_sets(&self) -> usize {
        self.n_sets
    }

    pub fn n_lines(&self) -> usize {
        self.n_sets * self.assoc
    }

    pub fn block_offset_bits(&self) -> u32 {
        self.set_sec.shift
    }

    pub fn tag_shift(&self) -> u32 {
        self.tag_sec.shift
    }

    pub fn split_addr(&self, addr: u64) -> Addr {
        let offset = self.offset_sec.apply(addr);
        let set = self.set_sec.apply(addr) as usize;
        let tag = self.tag_sec.apply(addr);
        Addr { offset, set, tag }
    }

    /// Ways of a set are strided by the set count: way `w` of set `s` is line `s + w * n_sets`.
    pub fn line_index(&self, set: usize, way: usize) -> usize {
        set + way * self.n_sets
    }
}

/// Per-line bookkeeping. No data is stored, only what decides hits and victims.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    pub tag: u64,
    pub valid: bool,
    pub last_used: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub reads: u64,
    pub read_misses: u64,
    pub writes: u64,
    pub write_misses: u64,
}

impl Statistics {
    pub fn accesses(&self) -> u64 {
        self.reads + self.writes
    }

    pub fn misses(&self) -> u64 {
        self.read_misses + self.write_misses
    }

    pub fn miss_rate(&self) -> f64 {
        match self.accesses() {
            0 => 0.0,
            n => self.misses() as f64 / n as f64,
        }
    }

    fn record(&mut self, ty: AccessType, result: AccessResult) {
        let miss = u64::from(result == AccessResult::Miss);
        match ty {
            AccessType::Read => {
                self.reads += 1;
                self.read_misses += miss;
            }
            AccessType::Write => {
                self.writes += 1;
                self.write_misses += miss;
            }
        }
    }
}

#[derive(Serialize)]
pub struct CacheStats {
    name: String,
    size: usize,
    block_size: usize,
    assoc: usize,
    reads: u64,
    read_misses: u64,
    writes: u64,
    write_misses: u64,
    miss_rate: f64,
}

/// Set-associative cache model with true LRU replacement.
///
/// A `Cache` only exists with a valid geometry: construction and [`Cache::resize`]
/// validate before touching any state.
#[derive(Debug, Clone)]
pub struct Cache {
    name: String,
    geometry: Geometry,
    lines: Vec<Line>,
    clock: u64,
    stats: Statistics,
}

impl Cache {
    pub fn new(size: usize, block_size: usize, assoc: usize) -> Result<Self, ConfigError> {
        Cache::with_name("cache", size, block_size, assoc)
    }

    pub fn with_name(
        name: impl Into<String>,
        size: usize,
        block_size: usize,
        assoc: usize,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let geometry = Geometry::new(size, block_size, assoc).inspect_err(|err| {
            warn!("[{name}] rejected geometry: {err}");
        })?;
        debug!(
            "[{name}] new: size={size} block_size={block_size} assoc={assoc} sets={}",
            geometry.n_sets
        );
        Ok(Cache {
            name,
            lines: vec![Line::default(); geometry.n_lines()],
            geometry,
            clock: 0,
            stats: Statistics::default(),
        })
    }

    /// Changes the geometry. All lines are discarded; statistics and the clock carry over.
    pub fn resize(
        &mut self,
        size: usize,
        block_size: usize,
        assoc: usize,
    ) -> Result<(), ConfigError> {
        let geometry = Geometry::new(size, block_size, assoc).inspect_err(|err| {
            warn!("[{}] resize rejected: {err}", self.name);
        })?;
        debug!(
            "[{}] resize: size={size} block_size={block_size} assoc={assoc} sets={}",
            self.name, geometry.n_sets
        );
        self.geometry = geometry;
        self.lines = vec![Line::default(); geometry.n_lines()];
        Ok(())
    }

    pub fn flush(&mut self) {
        debug!("[{}] flush", self.name);
        self.lines.fill(Line::default());
    }

    pub fn reset_statistics(&mut self) {
        debug!("[{}] reset statistics", self.name);
        self.stats = Statistics::default();
    }

    pub fn access(&mut self, addr: u64, ty: AccessType) -> AccessResult {
        let geometry = self.geometry;
        let split = geometry.split_addr(addr);
        let now = self.clock;

        let hit = (0..geometry.assoc)
            .map(|way| geometry.line_index(split.set, way))
            .find(|&idx| {
                let line = &self.lines[idx];
                line.valid && line.tag == split.tag
            });

        let result = if let Some(idx) = hit {
            self.lines[idx].last_used = now;
            AccessResult::Hit
        } else {
            let victim = self.victim(split.set);
            self.lines[victim] = Line {
                tag: split.tag,
                valid: true,
                last_used: now,
            };
            AccessResult::Miss
        };

        trace!(
            "[{}] {ty:?}: pa={addr:#018x} tag={:#x} set={} {result:?}",
            self.name,
            split.tag,
            split.set
        );

        self.stats.record(ty, result);
        self.clock += 1;
        result
    }

    /// Line index to fill in `set`: the first invalid way, else the least recently used.
    fn victim(&self, set: usize) -> usize {
        let geometry = &self.geometry;
        if geometry.assoc == 1 {
            return set;
        }
        (0..geometry.assoc)
            .map(|way| geometry.line_index(set, way))
            .min_by_key(|&idx| {
                let line = &self.lines[idx];
                (line.valid, line.last_used)
            })
            .unwrap_or(set)
    }

    /// Whether `addr` is currently cached. Touches neither recency nor statistics.
    pub fn probe(&self, addr: u64) -> bool {
        let split = self.geometry.split_addr(addr);
        self.set_lines(split.set)
            .any(|line| line.valid && line.tag == split.tag)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn stats(&self) -> Statistics {
        self.stats
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// The ways of `set` in way order.
    pub fn set_lines(&self, set: usize) -> impl Iterator<Item = &Line> + '_ {
        let n_sets = self.geometry.n_sets;
        self.lines.iter().skip(set).step_by(n_sets)
    }

    pub fn inspect(&self) -> Snapshot<'_> {
        Snapshot {
            name: &self.name,
            geometry: &self.geometry,
            stats: self.stats,
            clock: self.clock,
            lines: &self.lines,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            size: self.geometry.size,
            block_size: self.geometry.block_size,
            assoc: self.geometry.assoc,
            reads: self.stats.reads,
            read_misses: self.stats.read_misses,
            writes: self.stats.writes,
            write_misses: self.stats.write_misses,
            miss_rate: self.stats.miss_rate(),
        }
    }
}

impl fmt::Display for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] size: {}, assoc: {}, line-size: {}",
            self.name, self.geometry.size, self.geometry.assoc, self.geometry.block_size
        )
    }
}

/// Borrowed, read-only view of a cache's full state.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub name: &'a str,
    pub geometry: &'a Geometry,
    pub stats: Statistics,
    pub clock: u64,
    pub lines: &'a [Line],
}

impl fmt::Display for Snapshot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{}] sets: {}, assoc: {}, clock: {}",
            self.name,
            self.geometry.n_sets(),
            self.geometry.assoc(),
            self.clock
        )?;
        for (idx, line) in self.lines.iter().enumerate() {
            writeln!(
                f,
                "line {idx} (set {}, way {}): tag: {:#018x} valid: {} last_used: {}",
                idx % self.geometry.n_sets(),
                idx / self.geometry.n_sets(),
                line.tag,
                line.valid,
                line.last_used
            )?;
        }
        Ok(())
    }
}
