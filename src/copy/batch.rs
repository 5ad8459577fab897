/// A group of raw input records handed to a single worker.
///
/// Records are stored without their trailing newline. Once a batch is queued
/// it is only ever read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    records: Vec<Vec<u8>>,
    bytes: usize,
}

impl Batch {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            records: Vec::with_capacity(size),
            bytes: 0,
        }
    }

    pub fn push(&mut self, record: Vec<u8>) {
        self.bytes += record.len() + 1;
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Vec<u8>] {
        &self.records
    }

    /// Records joined into the text body of a `COPY ... FROM STDIN`,
    /// each terminated by a newline.
    pub fn copy_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.bytes);
        for record in &self.records {
            payload.extend_from_slice(record);
            payload.push(b'\n');
        }
        payload
    }
}
