/*!
 * Chunk planning
 *
 * Decides how an object of a given size moves: one request, or a multipart
 * transfer with a part size, a worker count and a round-robin assignment of
 * parts to workers. Plans are pure values; nothing here touches the store.
 */

use serde::Serialize;

use crate::config::TransferSettings;
use crate::error::{NimbusError, Result};

/// How the bytes of a transfer are moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStrategy {
    /// One PUT or GET for the whole object
    SinglePart,
    /// Multipart, parts held in the circular buffer
    Streaming,
    /// Multipart, parts larger than the circular buffer go through cache files
    CacheSpill,
}

impl TransferStrategy {
    pub fn is_multipart(&self) -> bool {
        !matches!(self, TransferStrategy::SinglePart)
    }
}

/// One part of a plan. Part numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartSpec {
    pub number: u32,
    pub offset: u64,
    pub length: u64,
}

/// Ephemeral description of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferPlan {
    pub total_size: u64,
    pub part_size: u64,
    pub strategy: TransferStrategy,
    pub thread_count: usize,
    pub parts: Vec<PartSpec>,
    /// Part numbers handled by each worker
    pub assignments: Vec<Vec<u32>>,
    /// Slots in the circular buffer
    pub buffer_slots: usize,
}

impl TransferPlan {
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    fn single(total_size: u64, settings: &TransferSettings) -> Self {
        Self {
            total_size,
            part_size: total_size,
            strategy: TransferStrategy::SinglePart,
            thread_count: 1,
            parts: vec![PartSpec {
                number: 1,
                offset: 0,
                length: total_size,
            }],
            assignments: vec![vec![1]],
            buffer_slots: settings.circular_buffer_parts,
        }
    }
}

/// Plan an upload of `total_size` bytes
pub fn plan(total_size: u64, settings: &TransferSettings) -> Result<TransferPlan> {
    let single_limit = settings.max_single_part_upload_size;

    if !settings.multipart_enabled {
        if total_size > single_limit {
            return Err(NimbusError::ObjectTooLarge {
                size: total_size,
                limit: single_limit,
            });
        }
        return Ok(TransferPlan::single(total_size, settings));
    }

    if total_size <= settings.single_buffer_threshold && total_size <= single_limit {
        return Ok(TransferPlan::single(total_size, settings));
    }

    multipart(total_size, settings)
}

/// Plan a download of `total_size` bytes.
///
/// Ranged GETs are always available, so the multipart switch and the
/// single-request upload limit do not apply.
pub fn plan_download(total_size: u64, settings: &TransferSettings) -> Result<TransferPlan> {
    if total_size <= settings.single_buffer_threshold {
        return Ok(TransferPlan::single(total_size, settings));
    }
    multipart(total_size, settings)
}

fn multipart(total_size: u64, settings: &TransferSettings) -> Result<TransferPlan> {
    let part_size = settings
        .part_size
        .max(settings.minimum_part_size)
        .max(total_size.div_ceil(settings.max_parts.max(1)));

    if part_size > settings.max_single_part_upload_size {
        return Err(NimbusError::Config(format!(
            "part size {} for a {} byte object exceeds the single upload limit {}",
            part_size, total_size, settings.max_single_part_upload_size
        )));
    }

    let part_count = total_size.div_ceil(part_size);
    let thread_count = (settings.max_threads.max(1) as u64).min(part_count) as usize;

    let parts: Vec<PartSpec> = (0..part_count)
        .map(|index| {
            let offset = index * part_size;
            PartSpec {
                number: (index + 1) as u32,
                offset,
                length: part_size.min(total_size - offset),
            }
        })
        .collect();

    let mut assignments = vec![Vec::new(); thread_count];
    for part in &parts {
        assignments[(part.number as usize - 1) % thread_count].push(part.number);
    }

    let strategy = if part_size <= settings.circular_buffer_capacity() {
        TransferStrategy::Streaming
    } else {
        TransferStrategy::CacheSpill
    };

    Ok(TransferPlan {
        total_size,
        part_size,
        strategy,
        thread_count,
        parts,
        assignments,
        buffer_slots: settings.circular_buffer_parts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_zero_byte_object() {
        let plan = plan(0, &TransferSettings::default()).unwrap();
        assert_eq!(plan.strategy, TransferStrategy::SinglePart);
        assert_eq!(plan.parts.len(), 1);
        assert_eq!(plan.parts[0].length, 0);
        assert_eq!(plan.thread_count, 1);
    }

    #[test]
    fn test_parts_cover_object() {
        let settings = TransferSettings::default();
        let total = 100 * MIB + 17;
        let plan = plan(total, &settings).unwrap();

        assert_eq!(plan.strategy, TransferStrategy::Streaming);
        assert_eq!(plan.part_size, 5 * MIB);
        assert_eq!(plan.parts.len(), 21);
        assert_eq!(plan.parts.iter().map(|p| p.length).sum::<u64>(), total);
        assert_eq!(plan.parts.last().unwrap().length, 17);
        assert!(plan.parts[..20].iter().all(|p| p.length == plan.part_size));
        assert_eq!(plan.thread_count, 10);
    }

    #[test]
    fn test_round_robin_assignment() {
        let settings = TransferSettings {
            max_threads: 3,
            ..Default::default()
        };
        let plan = plan(7 * 5 * MIB, &settings).unwrap();
        assert_eq!(plan.assignments, vec![vec![1, 4, 7], vec![2, 5], vec![3, 6]]);
    }

    #[test]
    fn test_part_count_ceiling_grows_parts() {
        let settings = TransferSettings {
            max_parts: 10,
            ..Default::default()
        };
        let plan = plan(200 * MIB, &settings).unwrap();
        assert_eq!(plan.part_size, 20 * MIB);
        assert_eq!(plan.parts.len(), 10);
    }

    #[test]
    fn test_large_parts_spill() {
        let settings = TransferSettings {
            part_size: 64 * MIB,
            ..Default::default()
        };
        let plan = plan(256 * MIB, &settings).unwrap();
        assert_eq!(plan.strategy, TransferStrategy::CacheSpill);
        assert_eq!(plan.thread_count, 4);
    }

    #[test]
    fn test_multipart_disabled() {
        let settings = TransferSettings {
            multipart_enabled: false,
            max_single_part_upload_size: 100 * MIB,
            ..Default::default()
        };
        let plan = plan(64 * MIB, &settings).unwrap();
        assert_eq!(plan.strategy, TransferStrategy::SinglePart);

        let err = plan_err(101 * MIB, &settings);
        assert!(matches!(err, NimbusError::ObjectTooLarge { .. }));
        assert_eq!(err.code().as_str(), "S3_PUT_ERROR");
    }

    fn plan_err(size: u64, settings: &TransferSettings) -> NimbusError {
        plan(size, settings).unwrap_err()
    }

    #[test]
    fn test_part_size_above_limit() {
        let settings = TransferSettings {
            max_parts: 1,
            max_single_part_upload_size: 50 * MIB,
            ..Default::default()
        };
        assert!(matches!(
            plan_err(60 * MIB, &settings),
            NimbusError::Config(_)
        ));
    }

    #[test]
    fn test_download_ignores_multipart_switch() {
        let settings = TransferSettings {
            multipart_enabled: false,
            max_single_part_upload_size: 10 * MIB,
            ..Default::default()
        };
        let plan = plan_download(64 * MIB, &settings).unwrap();
        assert_eq!(plan.strategy, TransferStrategy::Streaming);
    }
}
