//! Payload trimmer
//!
//! Rebuilds a payload without a selected subset of its records. Retained
//! bytes are copied unchanged; only the envelope's total length and record
//! count are rewritten so the result scans cleanly again. V5 events get
//! their hit record and trigger record counts rewritten the same way.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::common::{bytes, BoardId, Endian, PayloadError, PayloadResult};
use crate::decoder::event::constants as envelope;
use crate::decoder::v5::{constants as v5, V5Event, V5HitRecord};

use super::scanner::{PayloadIndex, PayloadScanner, RecordContent, ScannedRecord};

/// Which records to drop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimSelection {
    /// Launches from these boards are removed
    pub boards: BTreeSet<BoardId>,
    /// Also remove trigger request records
    pub drop_triggers: bool,
}

impl TrimSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every launch of the given boards
    pub fn boards<I: IntoIterator<Item = BoardId>>(boards: I) -> Self {
        Self {
            boards: boards.into_iter().collect(),
            drop_triggers: false,
        }
    }

    /// Drop every board present as a key of a launch map
    pub fn from_launch_map<V>(launches: &BTreeMap<BoardId, V>) -> Self {
        Self::boards(launches.keys().copied())
    }

    pub fn with_triggers(mut self, drop_triggers: bool) -> Self {
        self.drop_triggers = drop_triggers;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty() && !self.drop_triggers
    }

    /// Whether `record` is removed by this selection
    pub fn excludes(&self, record: &ScannedRecord) -> bool {
        match &record.content {
            RecordContent::Launch(launch) => self.boards.contains(&launch.board),
            RecordContent::Trigger(_) => self.drop_triggers,
            RecordContent::Unsupported => false,
        }
    }
}

/// Output of a trim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimmedPayload {
    pub data: Vec<u8>,
    pub removed_records: usize,
    pub removed_bytes: usize,
}

/// Removes records from payloads
#[derive(Clone, Copy)]
pub struct PayloadTrimmer<'r> {
    scanner: PayloadScanner<'r>,
}

impl<'r> PayloadTrimmer<'r> {
    pub fn new(scanner: PayloadScanner<'r>) -> Self {
        Self { scanner }
    }

    pub fn scanner(&self) -> &PayloadScanner<'r> {
        &self.scanner
    }

    /// Remove the records matched by `selection`
    pub fn trim(&self, buffer: &[u8], selection: &TrimSelection) -> PayloadResult<TrimmedPayload> {
        if V5Event::is_v5(buffer) {
            return self.trim_v5(buffer, selection);
        }
        self.trim_by(buffer, |record| selection.excludes(record))
    }

    /// Trim a V5 event
    ///
    /// Hit records are kept whole since their bodies are not decoded, so a
    /// board selection cannot be applied; only trigger records can go.
    pub fn trim_v5(&self, buffer: &[u8], selection: &TrimSelection) -> PayloadResult<TrimmedPayload> {
        if !selection.boards.is_empty() {
            return Err(PayloadError::format(
                "board selection is not supported for V5 hit records",
            ));
        }
        let event = V5Event::parse(buffer)?;
        rebuild_v5(buffer, &event, |_| false, selection.drop_triggers)
    }

    /// Remove every record for which `exclude` returns true
    pub fn trim_by<F>(&self, buffer: &[u8], exclude: F) -> PayloadResult<TrimmedPayload>
    where
        F: Fn(&ScannedRecord) -> bool,
    {
        let index = self.scanner.scan(buffer)?;
        rebuild(buffer, &index, exclude)
    }

    /// On-disk sizes of each board's launches, ordered by start time
    pub fn encoded_sizes(&self, buffer: &[u8]) -> PayloadResult<BTreeMap<BoardId, Vec<usize>>> {
        let index = self.scanner.scan(buffer)?;
        Ok(encoded_sizes(&index))
    }
}

/// Rebuild `buffer` from an index of it, leaving out excluded records
///
/// Fails if an excluded record's declared length disagrees with the length
/// its contents imply.
pub fn rebuild<F>(buffer: &[u8], index: &PayloadIndex, exclude: F) -> PayloadResult<TrimmedPayload>
where
    F: Fn(&ScannedRecord) -> bool,
{
    if index.buffer_len != buffer.len() {
        return Err(PayloadError::format(format!(
            "index covers {} bytes but buffer holds {}",
            index.buffer_len,
            buffer.len()
        )));
    }

    let mut data = Vec::with_capacity(buffer.len());
    if let Some(span) = index.header_span {
        data.extend_from_slice(span.slice(buffer));
    }

    let mut removed_records = 0;
    let mut removed_bytes = 0;
    for record in &index.records {
        if !exclude(record) {
            data.extend_from_slice(record.span.slice(buffer));
            continue;
        }
        if let Some(expected) = record.encoded_len {
            if expected != record.span.len() {
                return Err(PayloadError::format(format!(
                    "record at offset {} declares {} bytes but encodes {}",
                    record.span.start,
                    record.span.len(),
                    expected
                )));
            }
        }
        removed_records += 1;
        removed_bytes += record.span.len();
    }

    if index.header.is_some() {
        let length = u32::try_from(data.len()).map_err(|_| {
            PayloadError::format(format!("trimmed payload of {} bytes too large", data.len()))
        })?;
        let count = (index.records.len() - removed_records) as u32;
        bytes::write(Endian::Big, envelope::LENGTH, &mut data, length)?;
        bytes::write(Endian::Big, envelope::RECORD_COUNT, &mut data, count)?;
    }

    debug!(
        removed_records,
        removed_bytes,
        bytes_out = data.len(),
        "trimmed payload"
    );

    Ok(TrimmedPayload {
        data,
        removed_records,
        removed_bytes,
    })
}

/// Rebuild a V5 event without the excluded hit records and, if asked,
/// without its trigger records
pub fn rebuild_v5<F>(
    buffer: &[u8],
    event: &V5Event,
    exclude_hit: F,
    drop_triggers: bool,
) -> PayloadResult<TrimmedPayload>
where
    F: Fn(&V5HitRecord) -> bool,
{
    if event.header.length as usize != buffer.len() {
        return Err(PayloadError::format(format!(
            "event layout covers {} bytes but buffer holds {}",
            event.header.length,
            buffer.len()
        )));
    }

    let mut data = Vec::with_capacity(buffer.len());
    data.extend_from_slice(&buffer[..envelope::HEADER_SIZE]);

    let mut removed_records = 0;
    let mut removed_bytes = 0;
    let mut hits = 0u32;
    for hit in &event.hits {
        if exclude_hit(hit) {
            removed_records += 1;
            removed_bytes += hit.span.len();
        } else {
            data.extend_from_slice(hit.span.slice(buffer));
            hits += 1;
        }
    }

    let triggers = if drop_triggers {
        removed_records += event.triggers.len();
        removed_bytes += event.triggers.iter().map(|t| t.span.len()).sum::<usize>();
        0
    } else {
        event.triggers.len() as u32
    };
    bytes::push(Endian::Big, &mut data, triggers);
    if !drop_triggers {
        for trigger in &event.triggers {
            data.extend_from_slice(trigger.span.slice(buffer));
        }
    }

    let length = u32::try_from(data.len()).map_err(|_| {
        PayloadError::format(format!("trimmed payload of {} bytes too large", data.len()))
    })?;
    bytes::write(Endian::Big, envelope::LENGTH, &mut data, length)?;
    bytes::write(Endian::Big, v5::HIT_RECORD_COUNT, &mut data, hits)?;

    debug!(
        event_id = event.header.event_id,
        removed_records,
        removed_bytes,
        bytes_out = data.len(),
        "trimmed V5 event"
    );

    Ok(TrimmedPayload {
        data,
        removed_records,
        removed_bytes,
    })
}

/// Span lengths of each board's launches, ordered by start time
pub fn encoded_sizes(index: &PayloadIndex) -> BTreeMap<BoardId, Vec<usize>> {
    let mut sizes: BTreeMap<BoardId, Vec<usize>> = BTreeMap::new();
    for (launch, span) in index.launches_by_time() {
        sizes.entry(launch.board).or_default().push(span.len());
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::delta::constants::word1;
    use crate::decoder::v5::tests::make_v5;
    use crate::decoder::{DecodeConfiguration, HitRecordKind};

    fn make_type18(mbid: u64, launch_time: u64, extra: usize) -> Vec<u8> {
        let hit_size = 8 + extra;
        let mut buf = vec![0u8; 50 + hit_size];
        buf[0..4].copy_from_slice(&((50 + hit_size) as u32).to_be_bytes());
        buf[4..8].copy_from_slice(&18u32.to_be_bytes());
        buf[8..16].copy_from_slice(&launch_time.to_be_bytes());
        buf[28..36].copy_from_slice(&mbid.to_be_bytes());
        let w1 = word1::COMPRESSION_FLAG | (0x1 << word1::TRIGGER_WORD_SHIFT) | hit_size as u32;
        buf[50..54].copy_from_slice(&w1.to_be_bytes());
        buf
    }

    fn trimmer() -> PayloadTrimmer<'static> {
        PayloadTrimmer::new(PayloadScanner::new(DecodeConfiguration::new(0)))
    }

    #[test]
    fn test_empty_selection_is_identity() {
        let mut buf = make_type18(1, 10, 0);
        buf.extend(make_type18(2, 20, 3));
        let trimmed = trimmer().trim(&buf, &TrimSelection::new()).unwrap();
        assert_eq!(trimmed.data, buf);
        assert_eq!(trimmed.removed_records, 0);
        assert_eq!(trimmed.removed_bytes, 0);
    }

    #[test]
    fn test_trim_board() {
        let a = make_type18(1, 10, 0);
        let b = make_type18(2, 20, 3);
        let c = make_type18(1, 30, 1);
        let buf = [a.clone(), b.clone(), c.clone()].concat();

        let trimmed = trimmer()
            .trim(&buf, &TrimSelection::boards([BoardId(1)]))
            .unwrap();
        assert_eq!(trimmed.data, b);
        assert_eq!(trimmed.removed_records, 2);
        assert_eq!(trimmed.removed_bytes, a.len() + c.len());
    }

    #[test]
    fn test_inconsistent_length_rejected() {
        // Declared length 4 bytes longer than the hit implies
        let mut bad = make_type18(1, 10, 0);
        bad.extend_from_slice(&[0; 4]);
        let len = bad.len() as u32;
        bad[0..4].copy_from_slice(&len.to_be_bytes());
        let buf = [bad, make_type18(2, 0, 0)].concat();

        let err = trimmer()
            .trim(&buf, &TrimSelection::boards([BoardId(1)]))
            .unwrap_err();
        assert!(matches!(err, PayloadError::Format(_)));

        // Keeping the record is fine
        let trimmed = trimmer()
            .trim(&buf, &TrimSelection::boards([BoardId(2)]))
            .unwrap();
        assert_eq!(trimmed.removed_records, 1);
    }

    #[test]
    fn test_encoded_sizes_sorted_by_time() {
        // Board 1 launches at 5 ns and 3 ns, board 2 at 10 ns
        let buf = [
            make_type18(1, 50, 10),
            make_type18(2, 100, 0),
            make_type18(1, 30, 20),
        ]
        .concat();
        let sizes = trimmer().encoded_sizes(&buf).unwrap();
        assert_eq!(sizes[&BoardId(1)], vec![78, 68]);
        assert_eq!(sizes[&BoardId(2)], vec![58]);
    }

    #[test]
    fn test_selection_from_launch_map() {
        let mut map = BTreeMap::new();
        map.insert(BoardId(5), vec![1, 2]);
        map.insert(BoardId(9), vec![]);
        let selection = TrimSelection::from_launch_map(&map).with_triggers(true);
        assert_eq!(selection.boards.len(), 2);
        assert!(selection.drop_triggers);
        assert!(!selection.is_empty());
        assert!(TrimSelection::new().is_empty());
    }

    #[test]
    fn test_trim_v5_triggers() {
        let buf = make_v5(&[(1, vec![1; 6]), (0, vec![2; 2])], &[vec![0, 1], vec![1]]);
        let trimmed = trimmer()
            .trim(&buf, &TrimSelection::new().with_triggers(true))
            .unwrap();
        assert_eq!(trimmed.removed_records, 2);
        assert_eq!(trimmed.removed_bytes, 32 + 28);

        let event = V5Event::parse(&trimmed.data).unwrap();
        assert_eq!(event.hits.len(), 2);
        assert!(event.triggers.is_empty());
        assert_eq!(trimmed.data, make_v5(&[(1, vec![1; 6]), (0, vec![2; 2])], &[]));

        // Nothing selected leaves the event unchanged
        let same = trimmer().trim(&buf, &TrimSelection::new()).unwrap();
        assert_eq!(same.data, buf);
    }

    #[test]
    fn test_rebuild_v5_hit_records() {
        let buf = make_v5(&[(1, vec![1; 6]), (0, vec![2; 2]), (1, vec![3; 1])], &[vec![2]]);
        let event = V5Event::parse(&buf).unwrap();
        let trimmed = rebuild_v5(&buf, &event, |h| h.kind == HitRecordKind::Engineering, false)
            .unwrap();
        assert_eq!(trimmed.removed_records, 1);
        assert_eq!(trimmed.removed_bytes, 5);
        assert_eq!(trimmed.data, make_v5(&[(1, vec![1; 6]), (1, vec![3; 1])], &[vec![2]]));
    }

    #[test]
    fn test_trim_v5_rejects_board_selection() {
        let buf = make_v5(&[(1, vec![0; 4])], &[]);
        assert!(matches!(
            trimmer().trim(&buf, &TrimSelection::boards([BoardId(1)])),
            Err(PayloadError::Format(_))
        ));
    }

    #[test]
    fn test_rebuild_rejects_foreign_index() {
        let buf = make_type18(1, 0, 0);
        let index = trimmer().scanner().scan(&buf).unwrap();
        assert!(rebuild(&buf[..10], &index, |_| false).is_err());
    }
}
