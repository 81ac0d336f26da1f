//! The configuration file: one `key value` pair per line, in a fixed
//! order. Blank lines and lines starting with `#` are skipped.
//!
//! ```text
//! num-cpu 4
//! scheduler "rr"
//! quantum-cycles 5
//! batch-process-freq 1
//! min-ins 1000
//! max-ins 2000
//! delays-per-exec 0
//! max-overall-mem 16384
//! mem-per-frame 16
//! mem-per-proc 4096
//! ```
//!
//! The first seven keys are required. The memory keys and `fit` are
//! optional but, when present, keep their relative order and appear at
//! most once.
use crate::utils::*;
use crate::memory::{Fit, Policy};
use crate::scheduler::Algorithm;
use crate::tester::AdmissionParams;
use serde::Serialize;
use std::fs;

const REQUIRED: [&str; 7] = [
    "num-cpu",
    "scheduler",
    "quantum-cycles",
    "batch-process-freq",
    "min-ins",
    "max-ins",
    "delays-per-exec",
];

const OPTIONAL: [&str; 6] = [
    "max-overall-mem",
    "mem-per-frame",
    "min-mem-per-proc",
    "max-mem-per-proc",
    "mem-per-proc",
    "fit",
];

const MAX_CPUS: u64 = 128;
const MIN_MEM: u64 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SchedulerKind {
    Fcfs,
    Rr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Config {
    pub num_cpu:            usize,
    pub scheduler:          SchedulerKind,
    pub quantum_cycles:     u64,
    pub batch_process_freq: u64,
    pub min_ins:            u64,
    pub max_ins:            u64,
    pub delays_per_exec:    u64,
    pub max_overall_mem:    Bytes,
    pub mem_per_frame:      Bytes,
    pub min_mem_per_proc:   Bytes,
    pub max_mem_per_proc:   Bytes,
    pub fit:                Fit,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_cpu:            1,
            scheduler:          SchedulerKind::Fcfs,
            quantum_cycles:     1,
            batch_process_freq: 1,
            min_ins:            1,
            max_ins:            1,
            delays_per_exec:    0,
            max_overall_mem:    16384,
            mem_per_frame:      16,
            min_mem_per_proc:   4096,
            max_mem_per_proc:   4096,
            fit:                Fit::First,
        }
    }
}

impl Config {
    /// Reads and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let txt = fs::read_to_string(path).map_err(|e| ConfigError {
            line: 0,
            kind: ConfigErrorKind::Io(format!("{}: {e}", path.display())),
        })?;

        Self::parse(&txt)
    }

    /// Validates `txt`. Either every key checks out or nothing is
    /// returned.
    pub fn parse(txt: &str) -> Result<Self, ConfigError> {
        let mut cfg = Config::default();
        let mut lines = Lines::default();
        let mut next_req = 0;
        let mut next_opt = 0;
        let mut last_line = 0;
        for (idx, raw) in txt.lines().enumerate() {
            let line = idx + 1;
            last_line = line;
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let err = |kind| ConfigError { line, kind };
            let mut words = raw.split_whitespace();
            let (key, value) = match (words.next(), words.next(), words.next()) {
                (Some(k), Some(v), None)    => { (k, v) },
                _                           => { return Err(err(ConfigErrorKind::Malformed(String::from(raw)))); }
            };
            if next_req < REQUIRED.len() {
                if key != REQUIRED[next_req] {
                    return Err(err(misplaced(key)));
                }
                next_req += 1;
            } else {
                match OPTIONAL.iter().position(|k| *k == key) {
                    Some(pos) if pos >= next_opt    => { next_opt = pos + 1; },
                    _                               => { return Err(err(misplaced(key))); }
                }
            }
            cfg.set(key, value, line, &mut lines)?;
        }
        if next_req < REQUIRED.len() {
            return Err(ConfigError {
                line: last_line + 1,
                kind: ConfigErrorKind::Missing(REQUIRED[next_req]),
            });
        }
        cfg.cross_check(&lines, last_line + 1)?;

        Ok(cfg)
    }

    fn set(&mut self, key: &str, value: &str, line: usize, lines: &mut Lines) -> Result<(), ConfigError> {
        let err = |kind| ConfigError { line, kind };
        match key {
            "num-cpu"               => {
                self.num_cpu = number("num-cpu", value, 1, MAX_CPUS).map_err(err)? as usize;
            },
            "scheduler"             => {
                self.scheduler = match unquote(value) {
                    "fcfs"  => { SchedulerKind::Fcfs },
                    "rr"    => { SchedulerKind::Rr },
                    _       => {
                        return Err(err(ConfigErrorKind::OutOfRange {
                            key:    "scheduler",
                            value:  String::from(value),
                            range:  "{fcfs, rr}",
                        }));
                    }
                };
            },
            "quantum-cycles"        => {
                self.quantum_cycles = number("quantum-cycles", value, 1, CONFIG_LIMIT).map_err(err)?;
            },
            "batch-process-freq"    => {
                self.batch_process_freq = number("batch-process-freq", value, 1, CONFIG_LIMIT).map_err(err)?;
            },
            "min-ins"               => {
                self.min_ins = number("min-ins", value, 1, CONFIG_LIMIT).map_err(err)?;
            },
            "max-ins"               => {
                self.max_ins = number("max-ins", value, 1, CONFIG_LIMIT).map_err(err)?;
                if self.min_ins > self.max_ins {
                    return Err(err(ConfigErrorKind::Inconsistent(format!(
                        "min-ins ({}) exceeds max-ins ({})",
                        self.min_ins, self.max_ins
                    ))));
                }
            },
            "delays-per-exec"       => {
                self.delays_per_exec = number("delays-per-exec", value, 0, CONFIG_LIMIT).map_err(err)?;
            },
            "max-overall-mem"       => {
                self.max_overall_mem = pow2("max-overall-mem", value).map_err(err)?;
                lines.total = Some(line);
            },
            "mem-per-frame"         => {
                self.mem_per_frame = pow2("mem-per-frame", value).map_err(err)?;
                lines.frame = Some(line);
            },
            "min-mem-per-proc"      => {
                self.min_mem_per_proc = pow2("min-mem-per-proc", value).map_err(err)?;
                lines.min_proc = Some(line);
            },
            "max-mem-per-proc"      => {
                self.max_mem_per_proc = pow2("max-mem-per-proc", value).map_err(err)?;
                lines.max_proc = Some(line);
            },
            "mem-per-proc"          => {
                let m = pow2("mem-per-proc", value).map_err(err)?;
                self.min_mem_per_proc = m;
                self.max_mem_per_proc = m;
                lines.min_proc = Some(line);
                lines.max_proc = Some(line);
            },
            "fit"                   => {
                self.fit = match unquote(value) {
                    "first-fit" => { Fit::First },
                    "best-fit"  => { Fit::Best },
                    _           => {
                        return Err(err(ConfigErrorKind::OutOfRange {
                            key:    "fit",
                            value:  String::from(value),
                            range:  "{first-fit, best-fit}",
                        }));
                    }
                };
            },
            _                       => { return Err(err(ConfigErrorKind::UnknownKey(String::from(key)))); }
        }

        Ok(())
    }

    /// Checks that span several keys. Blame goes to the later of the
    /// keys involved, or to the end of the file if both kept their
    /// defaults.
    fn cross_check(&self, lines: &Lines, eof: usize) -> Result<(), ConfigError> {
        let blame = |a: Option<usize>, b: Option<usize>| a.max(b).unwrap_or(eof);
        if self.min_mem_per_proc > self.max_mem_per_proc {
            return Err(ConfigError {
                line: blame(lines.min_proc, lines.max_proc),
                kind: ConfigErrorKind::Inconsistent(format!(
                    "min-mem-per-proc ({}) exceeds max-mem-per-proc ({})",
                    self.min_mem_per_proc, self.max_mem_per_proc
                )),
            });
        }
        if self.max_mem_per_proc > self.max_overall_mem {
            return Err(ConfigError {
                line: blame(lines.max_proc, lines.total),
                kind: ConfigErrorKind::Inconsistent(format!(
                    "max-mem-per-proc ({}) exceeds max-overall-mem ({})",
                    self.max_mem_per_proc, self.max_overall_mem
                )),
            });
        }
        if self.mem_per_frame > self.max_overall_mem {
            return Err(ConfigError {
                line: blame(lines.frame, lines.total),
                kind: ConfigErrorKind::Inconsistent(format!(
                    "mem-per-frame ({}) exceeds max-overall-mem ({})",
                    self.mem_per_frame, self.max_overall_mem
                )),
            });
        }

        Ok(())
    }

    pub fn algorithm(&self) -> Algorithm {
        match self.scheduler {
            SchedulerKind::Fcfs => { Algorithm::Fcfs },
            SchedulerKind::Rr   => { Algorithm::RoundRobin { quantum: self.quantum_cycles } }
        }
    }

    /// A frame as large as the whole memory means no paging.
    pub fn is_paged(&self) -> bool {
        self.mem_per_frame != self.max_overall_mem
    }

    pub fn policy(&self) -> Policy {
        match (self.is_paged(), self.fit) {
            (true, _)           => { Policy::PagedFirstFit },
            (false, Fit::First) => { Policy::FlatFirstFit },
            (false, Fit::Best)  => { Policy::FlatBestFit }
        }
    }

    pub fn admission(&self) -> AdmissionParams {
        AdmissionParams {
            freq:       self.batch_process_freq,
            min_ins:    self.min_ins,
            max_ins:    self.max_ins,
            min_mem:    self.min_mem_per_proc,
            max_mem:    self.max_mem_per_proc,
        }
    }
}

// Where the memory keys were set, for blaming cross-key errors.
#[derive(Default)]
struct Lines {
    total:      Option<usize>,
    frame:      Option<usize>,
    min_proc:   Option<usize>,
    max_proc:   Option<usize>,
}

fn misplaced(key: &str) -> ConfigErrorKind {
    if REQUIRED.contains(&key) || OPTIONAL.contains(&key) {
        ConfigErrorKind::OutOfOrder(String::from(key))
    } else {
        ConfigErrorKind::UnknownKey(String::from(key))
    }
}

fn unquote(v: &str) -> &str {
    v.strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(v)
}

fn number(key: &'static str, value: &str, lo: u64, hi: u64) -> Result<u64, ConfigErrorKind> {
    let n = value.parse::<u64>().map_err(|_| ConfigErrorKind::NotANumber {
        key,
        value: String::from(value),
    })?;
    if n < lo || n > hi {
        return Err(ConfigErrorKind::OutOfRange {
            key,
            value: String::from(value),
            range: range_text(lo, hi),
        });
    }

    Ok(n)
}

fn pow2(key: &'static str, value: &str) -> Result<Bytes, ConfigErrorKind> {
    let n = number(key, value, MIN_MEM, CONFIG_LIMIT)?;
    if !n.is_power_of_two() {
        return Err(ConfigErrorKind::OutOfRange {
            key,
            value: String::from(value),
            range: "powers of two in [2, 2^32]",
        });
    }

    Ok(n)
}

fn range_text(lo: u64, hi: u64) -> &'static str {
    match (lo, hi) {
        (1, MAX_CPUS)       => { "[1, 128]" },
        (0, CONFIG_LIMIT)   => { "[0, 2^32]" },
        (MIN_MEM, _)        => { "[2, 2^32]" },
        _                   => { "[1, 2^32]" }
    }
}
