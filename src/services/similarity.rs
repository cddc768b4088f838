//! Gestalt pattern matching (Ratcliff/Obershelp).
//!
//! `ratio = 2 * M / T`, where `M` is the number of characters in all
//! matching blocks and `T` the total length of both strings. Blocks are
//! found by taking the longest common substring, then recursing on the
//! unmatched pieces left and right of it.

/// Similarity of `a` and `b` in `[0, 1]`. Two empty strings are identical.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    // Explicit stack instead of recursion.
    let mut pending = vec![(0, a.len(), 0, b.len())];
    let mut matched = 0;
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest common block in `a[alo..ahi]` / `b[blo..bhi]`.
///
/// Returns `(i, j, len)`. Among equally long blocks the one starting
/// earliest in `a` wins, then earliest in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_len) = (alo, blo, 0);
    // prev[j] = length of the common suffix ending at a[i-1], b[j-1]
    let width = bhi - blo;
    let mut prev = vec![0usize; width + 1];
    let mut cur = vec![0usize; width + 1];
    for i in alo..ahi {
        for j in blo..bhi {
            let col = j - blo + 1;
            cur[col] = if a[i] == b[j] { prev[col - 1] + 1 } else { 0 };
            if cur[col] > best_len {
                best_len = cur[col];
                best_i = i + 1 - best_len;
                best_j = j + 1 - best_len;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    (best_i, best_j, best_len)
}
