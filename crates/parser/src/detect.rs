//! Delimiter detection. Feeds rarely say which separator their export uses,
//! so we score each candidate against a prefix of the file and keep the one
//! that parses the most rows with the most consistent shape.

use std::cmp::Ordering;

/// Separators a feed file may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Semicolon,
    Tab,
    Pipe,
}

impl Delimiter {
    pub const ALL: [Delimiter; 4] = [
        Delimiter::Comma,
        Delimiter::Semicolon,
        Delimiter::Tab,
        Delimiter::Pipe,
    ];

    pub fn byte(&self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Semicolon => b';',
            Delimiter::Tab => b'\t',
            Delimiter::Pipe => b'|',
        }
    }

    /// Ties between equally-scored candidates resolve toward the more
    /// common separator.
    fn preference(&self) -> usize {
        match self {
            Delimiter::Comma => 3,
            Delimiter::Semicolon => 2,
            Delimiter::Tab => 1,
            Delimiter::Pipe => 0,
        }
    }
}

/// The relative score of one candidate delimiter over the sampled prefix.
#[derive(Debug, Clone, Copy, Default)]
struct Score {
    /// Rows in which the delimiter appeared at least once.
    row_count: usize,
    /// Mean delimiter count across all sampled rows.
    mean: f64,
    /// Standard deviation of the per-row delimiter counts.
    stddev: f64,
}

impl Score {
    fn coefficient_of_variation(&self) -> f64 {
        self.stddev / self.mean
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let row_cmp = self.row_count.cmp(&other.row_count);
        if !row_cmp.is_eq() {
            return Some(row_cmp);
        }
        if self.row_count == 0 {
            Some(Ordering::Equal)
        } else if self.mean == 0.0 || other.mean == 0.0 {
            self.mean.partial_cmp(&other.mean)
        } else {
            // A lower coefficient of variation means rows agree about the
            // column count, which is a stronger signal than the raw mean.
            self.coefficient_of_variation()
                .partial_cmp(&other.coefficient_of_variation())
                .map(Ordering::reverse)
        }
    }
}

/// Picks the most plausible delimiter for `peek`, a UTF-8 prefix of the
/// file. Always returns something; a single-column file scores zero for
/// every candidate and falls back to comma.
pub fn detect_delimiter(peek: &[u8]) -> Delimiter {
    let mut best = (Delimiter::Comma, Score::default());
    for candidate in Delimiter::ALL {
        let score = compute_score(peek, candidate);
        tracing::debug!(?candidate, ?score, "scored candidate delimiter");
        let better = match score.partial_cmp(&best.1) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => candidate.preference() > best.0.preference(),
            _ => false,
        };
        if better {
            best = (candidate, score);
        }
    }
    tracing::debug!(delimiter = ?best.0, "detected delimiter");
    best.0
}

fn compute_score(peek: &[u8], delimiter: Delimiter) -> Score {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter.byte())
        .has_headers(false)
        .flexible(true)
        .from_reader(peek);

    let mut row_scores = Vec::new();
    let mut row_count = 0usize;
    let mut record = csv::ByteRecord::new();
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => {}
            // The prefix may end mid-row; ignore both EOF and a trailing
            // parse error on the truncated row.
            Ok(false) | Err(_) => break,
        }
        // Count separators rather than cells: every candidate yields one
        // cell per row, so cells alone cannot distinguish candidates.
        let score = record.len().saturating_sub(1);
        if score > 0 {
            row_count += 1;
        }
        row_scores.push(score);
    }

    let (mean, stddev) = if row_count > 0 {
        let n = row_scores.len() as f64;
        let mean = row_scores.iter().sum::<usize>() as f64 / n;
        let variance = row_scores
            .iter()
            .map(|s| {
                let diff = mean - *s as f64;
                diff * diff
            })
            .sum::<f64>()
            / n;
        (mean, variance.sqrt())
    } else {
        (0.0, 0.0)
    };

    Score {
        row_count,
        mean,
        stddev,
    }
}
