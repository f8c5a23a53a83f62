use thiserror::Error;

pub type PartitionId = usize;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlignmentError {
    #[error("Partition '{name}' expects {expected} encoded states but received {actual}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Partition '{0}' spans no alignment columns")]
    EmptyPartition(String),
    #[error("Alignment contains no taxa")]
    NoTaxa,
}

#[derive(Debug, Clone)]
pub struct Partition {
    name: String,
    length: usize,
    data: Vec<u8>, // taxon-major: data[taxon * length + column]
}

impl Partition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn state(&self, taxon: usize, column: usize) -> u8 {
        self.data[taxon * self.length + column]
    }
}

#[derive(Debug, Clone)]
pub struct PartitionTable {
    taxa: Vec<String>,
    partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn new(taxa: Vec<String>) -> Result<Self, AlignmentError> {
        if taxa.is_empty() {
            return Err(AlignmentError::NoTaxa);
        }
        Ok(Self {
            taxa,
            partitions: Vec::new(),
        })
    }

    pub fn push_partition(
        &mut self,
        name: impl Into<String>,
        length: usize,
        data: Vec<u8>,
    ) -> Result<PartitionId, AlignmentError> {
        let name = name.into();
        if length == 0 {
            return Err(AlignmentError::EmptyPartition(name));
        }
        let expected = self.taxa.len() * length;
        if data.len() != expected {
            return Err(AlignmentError::ShapeMismatch {
                name,
                expected,
                actual: data.len(),
            });
        }
        self.partitions.push(Partition { name, length, data });
        Ok(self.partitions.len() - 1)
    }

    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    pub fn taxon_count(&self) -> usize {
        self.taxa.len()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(id)
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn total_columns(&self) -> usize {
        self.partitions.iter().map(|p| p.length).sum()
    }

    pub fn workloads(&self) -> Vec<(PartitionId, usize)> {
        self.partitions
            .iter()
            .enumerate()
            .map(|(id, p)| (id, p.length))
            .collect()
    }
}
