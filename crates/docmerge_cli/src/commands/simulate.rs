//! Simulate command implementation.

use super::CliError;
use docmerge_codec::Record;
use docmerge_core::{CompactionReport, Config, Engine};
use docmerge_storage::{Header, InMemoryBackend, TableContext};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Shape of the generated history.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Number of batches.
    pub batches: u64,
    /// Generations per batch.
    pub ages_per_batch: u64,
    /// Records per generation.
    pub records_per_age: usize,
    /// Payload bytes per record.
    pub payload_len: usize,
    /// Blob size ceiling.
    pub size_limit: usize,
}

/// Partition state at one point of the simulation.
#[derive(Debug, Default, Serialize)]
pub struct PartitionStats {
    /// Data documents (table header excluded).
    pub documents: usize,
    /// Records across data documents.
    pub records: u64,
    /// Compressed bytes across data documents.
    pub bytes: u64,
    /// Largest blob.
    pub largest: u64,
    /// Document count per `merged_level`.
    pub by_merged_level: BTreeMap<u8, usize>,
}

/// Simulation results.
#[derive(Debug, Serialize)]
pub struct SimulationStats {
    /// After ingestion.
    pub ingested: PartitionStats,
    /// After compaction.
    pub compacted: PartitionStats,
    /// `merge_documents` calls made.
    pub attempted: usize,
    /// Calls that succeeded.
    pub succeeded: usize,
    /// Calls that were not ready.
    pub not_ready: usize,
    /// Bytes written by merges below the top level.
    pub merged_size: u64,
    /// Bytes written by top-level merges.
    pub packaged_size: u64,
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if format != "text" && format != "json" {
        return Err(CliError::UnknownFormat(format.to_string()).into());
    }
    let stats = simulate(options)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Simulation:");
    println!("  Batches:          {}", options.batches);
    println!("  Records:          {}", stats.ingested.records);
    println!("  Size limit:       {} bytes", options.size_limit);
    println!();
    print_partition("After ingestion", &stats.ingested);
    print_partition("After compaction", &stats.compacted);
    println!("Merges:");
    println!("  Attempted:        {}", stats.attempted);
    println!("  Succeeded:        {}", stats.succeeded);
    println!("  Not ready:        {}", stats.not_ready);
    println!("  Merged bytes:     {}", stats.merged_size);
    println!("  Packaged bytes:   {}", stats.packaged_size);
    Ok(())
}

fn print_partition(title: &str, stats: &PartitionStats) {
    println!("{title}:");
    println!("  Documents:        {}", stats.documents);
    println!("  Bytes:            {}", stats.bytes);
    println!("  Largest blob:     {}", stats.largest);
    for (level, count) in &stats.by_merged_level {
        println!("  Level {level}:          {count}");
    }
    println!();
}

/// Ingests the generated history and compacts it.
pub fn simulate(options: &SimulateOptions) -> Result<SimulationStats, Box<dyn std::error::Error>> {
    if options.ages_per_batch == 0 {
        return Err(CliError::InvalidOption("ages must be at least 1".into()).into());
    }
    let engine = Engine::new(
        InMemoryBackend::new(),
        Config::new().size_limit(options.size_limit),
    )?;
    let ctx = TableContext::new("simulation", "events");
    engine.add_document(&ctx, Header::for_table(&ctx).with_ages(1, 1), Vec::new())?;

    let mut next_age = 2u64;
    for batch in 0..options.batches {
        let first = next_age;
        let last = first + options.ages_per_batch - 1;
        let mut records = Vec::new();
        for age in first..=last {
            for n in 0..options.records_per_age {
                records.push(
                    Record::aged(age as i64)
                        .with("batch", batch as i64)
                        .with("payload", payload(age, n, options.payload_len)),
                );
            }
        }
        engine.add_document(&ctx, Header::for_table(&ctx).with_ages(first, last), records)?;
        next_age = last + 1;
    }
    tracing::info!(batches = options.batches, "ingestion finished");

    let ingested = partition_stats(engine.backend(), &ctx);
    let CompactionReport {
        attempted,
        succeeded,
        not_ready,
    } = engine.compact_all(&ctx)?;
    let counters = engine.table_counters(&ctx)?.unwrap_or_default();

    Ok(SimulationStats {
        ingested,
        compacted: partition_stats(engine.backend(), &ctx),
        attempted,
        succeeded,
        not_ready,
        merged_size: counters.merged_size,
        packaged_size: counters.packaged_size,
    })
}

fn partition_stats(backend: &InMemoryBackend, ctx: &TableContext) -> PartitionStats {
    let mut stats = PartitionStats::default();
    for (_, header) in backend.snapshot(ctx) {
        if header.is_table_header() {
            continue;
        }
        stats.documents += 1;
        stats.records += header.line_nb;
        stats.bytes += header.data_size;
        stats.largest = stats.largest.max(header.data_size);
        *stats.by_merged_level.entry(header.merged_level).or_default() += 1;
    }
    stats
}

/// Pseudo-random payload, stable across runs.
fn payload(age: u64, n: usize, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut hasher = Sha256::new();
    hasher.update(age.to_le_bytes());
    hasher.update((n as u64).to_le_bytes());
    let mut block = hasher.finalize();
    while out.len() < len {
        out.extend_from_slice(&block);
        block = Sha256::digest(block);
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_preserves_records() {
        let options = SimulateOptions {
            batches: 30,
            ages_per_batch: 3,
            records_per_age: 2,
            payload_len: 48,
            size_limit: 4096,
        };
        let stats = simulate(&options).unwrap();

        assert_eq!(stats.ingested.records, 180);
        assert_eq!(stats.compacted.records, 180);
        assert!(stats.compacted.documents <= stats.ingested.documents);
        assert!(stats.compacted.largest < 4096);
        assert_eq!(stats.not_ready, 0);
    }

    #[test]
    fn rejects_zero_ages() {
        let options = SimulateOptions {
            batches: 1,
            ages_per_batch: 0,
            records_per_age: 1,
            payload_len: 1,
            size_limit: 4096,
        };
        assert!(simulate(&options).is_err());
    }
}
