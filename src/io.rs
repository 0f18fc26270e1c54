use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::hypergraph::Hypergraph;
use crate::{HypernodeId, NodeWeight, PartitionId};

/// Errors raised while reading hypergraph or community files.
#[derive(Debug)]
pub enum InputError {
    Io(std::io::Error),
    /// Malformed file contents; carries the 1-based line and a reason.
    Malformed { line: usize, reason: String },
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::Io(err) => write!(f, "i/o error: {err}"),
            InputError::Malformed { line, reason } => {
                write!(f, "malformed input at line {line}: {reason}")
            }
        }
    }
}

impl std::error::Error for InputError {}

impl From<std::io::Error> for InputError {
    fn from(err: std::io::Error) -> Self {
        InputError::Io(err)
    }
}

fn malformed(line: usize, reason: impl Into<String>) -> InputError {
    InputError::Malformed {
        line,
        reason: reason.into(),
    }
}

/// Reads a hypergraph in hMETIS format.
///
/// The header line holds `num_edges num_nodes [fmt]`; fmt 1 adds per-net
/// weights (first token of each net line), fmt 10 per-vertex weight lines
/// after the nets, fmt 11 both. Pins are 1-indexed. `%` starts a comment.
pub fn read_hypergraph_file(path: &Path, stable: bool) -> Result<Hypergraph, InputError> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader
        .lines()
        .enumerate()
        .filter_map(|(i, l)| match l {
            Ok(l) if l.trim_start().starts_with('%') || l.trim().is_empty() => None,
            Ok(l) => Some(Ok((i + 1, l))),
            Err(e) => Some(Err(e)),
        });

    let (header_line, header) = lines
        .next()
        .ok_or_else(|| malformed(1, "empty hypergraph file"))??;
    let mut fields = header.split_whitespace();
    let num_edges: usize = fields
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| malformed(header_line, "expected number of nets"))?;
    let num_nodes: usize = fields
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| malformed(header_line, "expected number of vertices"))?;
    let fmt: u32 = match fields.next() {
        None => 0,
        Some(t) => t
            .parse()
            .ok()
            .filter(|f| matches!(f, 0 | 1 | 10 | 11))
            .ok_or_else(|| malformed(header_line, "unknown format code"))?,
    };
    let has_edge_weights = fmt == 1 || fmt == 11;
    let has_node_weights = fmt == 10 || fmt == 11;

    let mut edge_vector: Vec<Vec<HypernodeId>> = Vec::with_capacity(num_edges);
    let mut edge_weights: Vec<i64> = Vec::with_capacity(num_edges);
    for _ in 0..num_edges {
        let (line_no, line) = lines
            .next()
            .ok_or_else(|| malformed(header_line, "fewer net lines than announced"))??;
        let mut tokens = line.split_whitespace();
        let weight = if has_edge_weights {
            tokens
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| malformed(line_no, "expected net weight"))?
        } else {
            1
        };
        let mut pins = Vec::new();
        for token in tokens {
            let pin: usize = token
                .parse()
                .map_err(|_| malformed(line_no, format!("bad pin `{token}`")))?;
            if pin == 0 || pin > num_nodes {
                return Err(malformed(line_no, format!("pin {pin} out of range")));
            }
            pins.push((pin - 1) as HypernodeId);
        }
        if pins.is_empty() {
            return Err(malformed(line_no, "net without pins"));
        }
        edge_vector.push(pins);
        edge_weights.push(weight);
    }

    let node_weights: Option<Vec<NodeWeight>> = if has_node_weights {
        let mut weights = Vec::with_capacity(num_nodes);
        for _ in 0..num_nodes {
            let (line_no, line) = lines
                .next()
                .ok_or_else(|| malformed(header_line, "fewer weight lines than vertices"))??;
            let w: NodeWeight = line
                .trim()
                .parse()
                .map_err(|_| malformed(line_no, "bad vertex weight"))?;
            weights.push(w);
        }
        Some(weights)
    } else {
        None
    };

    Ok(Hypergraph::new(
        num_nodes as HypernodeId,
        &edge_vector,
        if has_edge_weights {
            Some(&edge_weights)
        } else {
            None
        },
        node_weights.as_deref(),
        stable,
    ))
}

/// Reads one community label per vertex, one label per line.
pub fn read_community_file(path: &Path, num_nodes: usize) -> Result<Vec<i32>, InputError> {
    let reader = BufReader::new(File::open(path)?);
    let mut communities = Vec::with_capacity(num_nodes);
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let c: i32 = trimmed
            .parse()
            .map_err(|_| malformed(i + 1, "bad community label"))?;
        communities.push(c);
    }
    if communities.len() != num_nodes {
        return Err(malformed(
            0,
            format!(
                "expected {num_nodes} community labels, found {}",
                communities.len()
            ),
        ));
    }
    Ok(communities)
}

/// Output file name for a partition: `<input>.part<k>.epsilon<ε>.seed<s>.KaHyPar`.
pub fn partition_file_name(input: &Path, k: PartitionId, epsilon: f64, seed: u64) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(format!(".part{k}.epsilon{epsilon}.seed{seed}.KaHyPar"));
    PathBuf::from(name)
}

/// Write the partition to a file; the i-th line is the block id of vertex i.
pub fn write_partition_file(partition: &[PartitionId], path: &Path) -> Result<(), std::io::Error> {
    let mut file = File::create(path)?;
    for block in partition {
        writeln!(file, "{block}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;

    fn create_mock_file(dir: &Path, filename: &str, content: &str) -> PathBuf {
        let file_path = dir.join(filename);
        let mut file = File::create(&file_path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file_path
    }

    #[test]
    fn test_read_plain_hypergraph() -> Result<(), InputError> {
        let temp_dir = tempdir().unwrap();

        let content = "\
% tiny test hypergraph
4 7
1 2
1 7 5 6
5 6 4
2 3 4
";
        let path = create_mock_file(temp_dir.path(), "plain.hgr", content);

        let hg = read_hypergraph_file(&path, true)?;

        assert_eq!(hg.num_nodes(), 7);
        assert_eq!(hg.num_edges(), 4);
        assert_eq!(hg.num_pins(), 12);
        assert_eq!(hg.edge_weight(0), 1);
        let pins: Vec<_> = hg.pins(1).collect();
        assert_eq!(pins, vec![0, 6, 4, 5]);
        Ok(())
    }

    #[test]
    fn test_read_weighted_hypergraph() -> Result<(), InputError> {
        let temp_dir = tempdir().unwrap();

        let content = "\
2 3 11
7 1 2
3 2 3
4
2
9
";
        let path = create_mock_file(temp_dir.path(), "weighted.hgr", content);

        let hg = read_hypergraph_file(&path, true)?;

        assert_eq!(hg.edge_weight(0), 7);
        assert_eq!(hg.edge_weight(1), 3);
        assert_eq!(hg.node_weight(0), 4);
        assert_eq!(hg.node_weight(2), 9);
        assert_eq!(hg.total_weight(), 15);
        Ok(())
    }

    #[test]
    fn test_pin_out_of_range_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let path = create_mock_file(temp_dir.path(), "broken.hgr", "1 2\n1 5\n");

        let result = read_hypergraph_file(&path, true);

        assert!(matches!(
            result,
            Err(InputError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn test_partition_round_trip_and_file_name() {
        let temp_dir = tempdir().unwrap();
        let input = temp_dir.path().join("graph.hgr");
        let partition = vec![0, 1, 1, 0];

        let out = partition_file_name(&input, 2, 0.03, 42);
        write_partition_file(&partition, &out).unwrap();

        assert!(out
            .to_string_lossy()
            .ends_with("graph.hgr.part2.epsilon0.03.seed42.KaHyPar"));
        let read_back: Vec<PartitionId> = std::fs::read_to_string(&out)
            .unwrap()
            .lines()
            .map(|l| l.parse().unwrap())
            .collect();
        assert_eq!(read_back, partition);
    }
}
