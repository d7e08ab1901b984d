//! The extraction pipeline: logical entry to plain bytes.
//!
//! For each request this resolves covering compression blocks, reads
//! their ciphertext block-aligned, decrypts with the container's key,
//! decompresses through the codec registry, and splices the pieces
//! into the requested window. Extraction is a pure function of the
//! index and the on-disk bytes; nothing is retried here.

use tracing::{trace, warn};
use uepak_codec::CodecRegistry;
use uepak_crypto::{decrypt_ecb_in_place, KeyStore};

use crate::cancel::CancelSignal;
use crate::error::{ArchiveError, Result};
use crate::iostore::toc::{IoStoreToc, OffsetAndLength};
use crate::pak::entry::PakEntry;
use crate::pak::index::PakIndex;
use crate::reader::ContainerFile;

/// Round up to the AES block size.
pub(crate) fn align_up_16(n: u64) -> u64 {
    n + ((16 - (n % 16)) % 16)
}

fn check_cancelled(cancel: &dyn CancelSignal) -> Result<()> {
    if cancel.is_cancelled() {
        Err(ArchiveError::Cancelled)
    } else {
        Ok(())
    }
}

/// Materialize one PAK entry.
pub(crate) fn extract_pak_entry(
    file: &ContainerFile,
    index: &PakIndex,
    entry: &PakEntry,
    keys: &KeyStore,
    codecs: &CodecRegistry,
    cancel: &dyn CancelSignal,
) -> Result<Vec<u8>> {
    let key = if entry.encrypted {
        Some(
            keys.get(&index.encryption_guid)
                .ok_or(ArchiveError::KeyMissing {
                    guid: index.encryption_guid,
                })?,
        )
    } else {
        None
    };

    let body_start = entry.offset + entry.serialized_size(index.version);

    if entry.compression_slot == 0 {
        check_cancelled(cancel)?;
        let read_len = if entry.encrypted {
            align_up_16(entry.compressed_size)
        } else {
            entry.compressed_size
        };
        let mut buf = file.read_at(body_start, read_len as usize)?;
        if let Some(key) = &key {
            decrypt_ecb_in_place(&mut buf, key)?;
        }
        buf.truncate(entry.uncompressed_size as usize);
        if buf.len() as u64 != entry.uncompressed_size {
            return Err(ArchiveError::CorruptBlock {
                block: 0,
                expected: entry.uncompressed_size,
                actual: buf.len() as u64,
            });
        }
        return Ok(buf);
    }

    let method = index.method_name(entry.compression_slot)?;
    let block_size = u64::from(entry.compression_block_size);
    if block_size == 0 || entry.blocks.is_empty() {
        return Err(ArchiveError::corrupt(
            "compressed entry without compression blocks",
        ));
    }

    let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
    let last = entry.blocks.len() - 1;
    for (block_index, span) in entry.blocks.iter().enumerate() {
        check_cancelled(cancel)?;

        let read_len = if entry.encrypted {
            align_up_16(span.len())
        } else {
            span.len()
        };
        trace!(
            "PAK block {}/{}: {} bytes at body offset {}",
            block_index + 1,
            entry.blocks.len(),
            read_len,
            span.start
        );
        let mut buf = file.read_at(body_start + span.start, read_len as usize)?;
        if let Some(key) = &key {
            decrypt_ecb_in_place(&mut buf, key)?;
            buf.truncate(span.len() as usize);
        }

        let remaining = entry.uncompressed_size - out.len() as u64;
        let expected = remaining.min(block_size) as usize;
        let produced = codecs.decompress(method, &buf, expected)?;
        out.extend_from_slice(&produced);
    }

    if out.len() as u64 != entry.uncompressed_size {
        return Err(ArchiveError::CorruptBlock {
            block: last,
            expected: entry.uncompressed_size,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

/// Materialize a chunk's logical byte range from an IoStore container.
pub(crate) fn extract_iostore_chunk(
    toc: &IoStoreToc,
    partitions: &[ContainerFile],
    range: OffsetAndLength,
    keys: &KeyStore,
    codecs: &CodecRegistry,
    cancel: &dyn CancelSignal,
) -> Result<Vec<u8>> {
    if range.length == 0 {
        return Ok(Vec::new());
    }

    let encrypted = toc.is_encrypted();
    let key = if encrypted {
        Some(
            keys.get(&toc.encryption_guid)
                .ok_or(ArchiveError::KeyMissing {
                    guid: toc.encryption_guid,
                })?,
        )
    } else {
        None
    };

    let block_size = u64::from(toc.compression_block_size);
    let first_block = range.offset / block_size;
    let last_block = (range.offset + range.length - 1) / block_size;

    let mut out = Vec::with_capacity(range.length as usize);
    // Only the first block is entered mid-way.
    let mut skip = (range.offset % block_size) as usize;

    for block_index in first_block..=last_block {
        check_cancelled(cancel)?;

        let block = toc
            .compression_blocks
            .get(block_index as usize)
            .ok_or_else(|| {
                ArchiveError::corrupt(format!("block {block_index} past the block table"))
            })?;

        // Each block routes to its own partition; a chunk may straddle
        // partitions but a single block never does.
        let partition = block.offset / toc.partition_size;
        let local_offset = block.offset % toc.partition_size;
        let file = partitions.get(partition as usize).ok_or(
            ArchiveError::PartitionMissing {
                index: partition as u32,
            },
        )?;

        let read_len = if encrypted {
            align_up_16(u64::from(block.compressed_size))
        } else {
            u64::from(block.compressed_size)
        };
        trace!(
            "CAS block {block_index}: {read_len} bytes at {local_offset} in partition {partition}"
        );
        let mut buf = file.read_at(local_offset, read_len as usize)?;
        if let Some(key) = &key {
            decrypt_ecb_in_place(&mut buf, key)?;
            buf.truncate(block.compressed_size as usize);
        }

        let produced = if block.method_index == 0 {
            if buf.len() != block.uncompressed_size as usize {
                if block_index == last_block {
                    return Err(ArchiveError::CorruptBlock {
                        block: block_index as usize,
                        expected: u64::from(block.uncompressed_size),
                        actual: buf.len() as u64,
                    });
                }
                warn!(
                    "block {} holds {} stored bytes where the table records {}",
                    block_index,
                    buf.len(),
                    block.uncompressed_size
                );
            }
            buf
        } else {
            let method = toc.method_name(block.method_index)?;
            codecs.decompress(method, &buf, block.uncompressed_size as usize)?
        };

        let want = (range.length - out.len() as u64) as usize;
        let start = skip.min(produced.len());
        let take = (produced.len() - start).min(want);
        out.extend_from_slice(&produced[start..start + take]);
        skip = 0;
    }

    if out.len() as u64 != range.length {
        return Err(ArchiveError::CorruptBlock {
            block: last_block as usize,
            expected: range.length,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}
