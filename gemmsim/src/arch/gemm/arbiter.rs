use serde::{Deserialize, Serialize};

/// Round-robin arbiter for the shared external-memory port.
///
/// The search for the next grant starts just after the previous grantee, so the
/// channel that was served last drops below every other requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRobinArbiter {
  num_channels: usize,
  last_grant: Option<usize>,
  grants: u64,
}

impl RoundRobinArbiter {
  pub fn new(num_channels: usize) -> Self {
    Self {
      num_channels,
      last_grant: None,
      grants: 0,
    }
  }

  pub fn num_channels(&self) -> usize {
    self.num_channels
  }

  pub fn last_grant(&self) -> Option<usize> {
    self.last_grant
  }

  pub fn grant_count(&self) -> u64 {
    self.grants
  }

  /// Pick one requester. `requests[i]` is channel i's request line.
  pub fn arbitrate(&mut self, requests: &[bool]) -> Option<usize> {
    let n = self.num_channels.min(requests.len());
    if n == 0 {
      return None;
    }

    let start = self.last_grant.map(|g| (g + 1) % n).unwrap_or(0);
    let winner = (0..n).map(|i| (start + i) % n).find(|&ch| requests[ch])?;

    self.last_grant = Some(winner);
    self.grants += 1;
    Some(winner)
  }

  pub fn reset(&mut self) {
    self.last_grant = None;
  }
}
