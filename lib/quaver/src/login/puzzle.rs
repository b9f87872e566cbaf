//! Proof of work issued by the access point during login.
use crate::login::keys::RANDOM_SIZE;
use byteorder::{BigEndian, ByteOrder};
use flint::crypto;

pub const SOLUTION_SIZE: usize = 8;
/// The only puzzle kind the access point is known to issue.
pub const PUZZLE_TYPE_HASH: u8 = 0x01;
/// Hardest puzzle the client attempts, about 16 million hashes on average.
pub const MAX_DENOMINATOR: u8 = 24;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Puzzle {
    /// Number of trailing zero bits required.
    pub denominator: u8,
    pub magic: u32,
}

impl Puzzle {
    #[inline]
    fn mask(&self) -> u32 {
        match self.denominator >= 32 {
            true => u32::MAX,
            _ => (1u32 << self.denominator) - 1,
        }
    }

    /// Checks a candidate solution against the server random.
    pub fn verify(&self, server_random: &[u8; RANDOM_SIZE], solution: &[u8; SOLUTION_SIZE]) -> bool {
        let digest = crypto::sha1(&[&server_random[..], &solution[..]]);
        let value = BigEndian::read_u32(&digest[16..20]) ^ self.magic;

        value & self.mask() == 0
    }

    /// Tries random candidates until one is accepted. Returns `None` without trying when the puzzle
    /// is harder than `MAX_DENOMINATOR`.
    pub fn solve(&self, server_random: &[u8; RANDOM_SIZE]) -> Option<[u8; SOLUTION_SIZE]> {
        if self.denominator > MAX_DENOMINATOR {
            return None;
        }

        let mut solution = [0u8; SOLUTION_SIZE];

        loop {
            crypto::random_bytes(&mut solution);

            if self.verify(server_random, &solution) {
                return Some(solution);
            }
        }
    }
}
