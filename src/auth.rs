use async_trait::async_trait;

/// Decides whether a `hello` may open an operator session.
#[async_trait]
pub trait AuthSource: Send + Sync {
    async fn verify_operator(&self, id: &str, password: &str) -> bool;
}

/// Single shared operator password.
#[derive(Debug)]
pub struct OperatorAuth {
    password: String,
}

impl OperatorAuth {
    pub fn new(password: String) -> Self {
        Self { password }
    }

    /// Compares every byte regardless of where the first mismatch is.
    pub fn check(&self, candidate: &str) -> bool {
        let expected = self.password.as_bytes();
        let candidate = candidate.as_bytes();
        if expected.len() != candidate.len() {
            return false;
        }
        expected
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[async_trait]
impl AuthSource for OperatorAuth {
    async fn verify_operator(&self, id: &str, password: &str) -> bool {
        !id.trim().is_empty() && self.check(password)
    }
}
