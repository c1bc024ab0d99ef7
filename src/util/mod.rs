pub mod clock;
pub mod env;
pub mod telemetry;

/// Performs `&str` comparisons in constant time (relative to the length of the inputs) so that
/// token checks don't leak how many leading bytes matched
pub fn constant_time_cmp(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let res = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (l, r)| acc | std::hint::black_box(l ^ r));

    res == 0
}
