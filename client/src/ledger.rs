//! Ledger binding: the calls this client makes and the chain state it reads.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shroud_crypto::{Commitment, ProofArgs, Salt};

use crate::abi::{self, Word};
use crate::error::ClientResult;
use crate::types::{Address, GameId, Location, TxHash, UnitId};

/// Caller-supplied fee settings; the executor adds the nonce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u128>,
}

/// A state-changing call on the game contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerCall {
    CreateGame,
    JoinGame {
        game: GameId,
    },
    MoveUnit {
        game: GameId,
        unit: UnitId,
        to: Location,
    },
    PlaceHidden {
        game: GameId,
        unit: UnitId,
        commitment: Commitment,
    },
    MoveHidden {
        game: GameId,
        unit: UnitId,
        proof: ProofArgs,
    },
    RevealUnit {
        game: GameId,
        unit: UnitId,
        location: Location,
        salt: Salt,
    },
}

impl LedgerCall {
    pub fn method(&self) -> &'static str {
        match self {
            LedgerCall::CreateGame => "createGame",
            LedgerCall::JoinGame { .. } => "joinGame",
            LedgerCall::MoveUnit { .. } => "movePiece",
            LedgerCall::PlaceHidden { .. } => "placeHidden",
            LedgerCall::MoveHidden { .. } => "moveHidden",
            LedgerCall::RevealUnit { .. } => "revealUnit",
        }
    }

    pub fn signature(&self) -> String {
        match self {
            LedgerCall::CreateGame => abi::CREATE_GAME.to_string(),
            LedgerCall::JoinGame { .. } => abi::JOIN_GAME.to_string(),
            LedgerCall::MoveUnit { .. } => abi::MOVE_PIECE.to_string(),
            LedgerCall::PlaceHidden { .. } => abi::PLACE_HIDDEN.to_string(),
            LedgerCall::MoveHidden { proof, .. } => {
                abi::move_hidden_signature(proof.public_signals.len())
            }
            LedgerCall::RevealUnit { .. } => abi::REVEAL_UNIT.to_string(),
        }
    }

    pub fn game(&self) -> Option<GameId> {
        match self {
            LedgerCall::CreateGame => None,
            LedgerCall::JoinGame { game }
            | LedgerCall::MoveUnit { game, .. }
            | LedgerCall::PlaceHidden { game, .. }
            | LedgerCall::MoveHidden { game, .. }
            | LedgerCall::RevealUnit { game, .. } => Some(*game),
        }
    }

    fn words(&self) -> Vec<Word> {
        match self {
            LedgerCall::CreateGame => Vec::new(),
            LedgerCall::JoinGame { game } => vec![abi::word_u64(*game)],
            LedgerCall::MoveUnit { game, unit, to } => {
                let [row, col] = abi::location_words(to);
                vec![abi::word_u64(*game), abi::word_u64(*unit), row, col]
            }
            LedgerCall::PlaceHidden {
                game,
                unit,
                commitment,
            } => vec![
                abi::word_u64(*game),
                abi::word_u64(*unit),
                commitment.to_be_bytes(),
            ],
            LedgerCall::MoveHidden { game, unit, proof } => {
                let mut words = vec![abi::word_u64(*game), abi::word_u64(*unit)];
                words.extend(proof.flatten().iter().map(abi::word_field));
                words
            }
            LedgerCall::RevealUnit {
                game,
                unit,
                location,
                salt,
            } => {
                let [row, col] = abi::location_words(location);
                vec![
                    abi::word_u64(*game),
                    abi::word_u64(*unit),
                    row,
                    col,
                    abi::word_field(&salt.as_field()),
                ]
            }
        }
    }

    /// Selector plus arguments, ready for `data`.
    pub fn encode(&self) -> Vec<u8> {
        abi::calldata(&self.signature(), &self.words())
    }
}

/// Fully specified submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub from: Address,
    pub to: Address,
    pub call: LedgerCall,
    pub nonce: u64,
    pub gas: GasOverrides,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub status: ReceiptStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainPlacement {
    Public(Location),
    Hidden(Commitment),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainUnit {
    pub id: UnitId,
    pub owner: Address,
    pub placement: ChainPlacement,
}

/// Public game state at one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub game: GameId,
    pub block_number: u64,
    pub units: Vec<ChainUnit>,
}

impl ChainSnapshot {
    pub fn unit(&self, id: UnitId) -> Option<&ChainUnit> {
        self.units.iter().find(|unit| unit.id == id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum GameEvent {
    CreatedGame { game: GameId, creator: Address },
    GameStart { game: GameId },
    ActionMade { game: GameId, player: Address },
    GameFinished { game: GameId, winner: Address },
}

impl GameEvent {
    pub fn game(&self) -> GameId {
        match self {
            GameEvent::CreatedGame { game, .. }
            | GameEvent::GameStart { game }
            | GameEvent::ActionMade { game, .. }
            | GameEvent::GameFinished { game, .. } => *game,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventBatch {
    pub events: Vec<GameEvent>,
    /// First block not yet covered; pass it back on the next poll.
    pub next_block: u64,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Spendable balance in wei.
    async fn balance(&self, account: &Address) -> ClientResult<u128>;

    /// Next nonce the node would accept, including pending transactions.
    async fn nonce(&self, account: &Address) -> ClientResult<u64>;

    /// Hands a transaction to the node. Returns once the node accepts or
    /// rejects it; a rejection is [`ClientError::Submission`](crate::error::ClientError::Submission).
    async fn submit(&self, tx: LedgerTransaction) -> ClientResult<TxHash>;

    /// Waits until `tx_hash` is mined. No timeout.
    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> ClientResult<Receipt>;

    async fn game_snapshot(&self, contract: &Address, game: GameId) -> ClientResult<ChainSnapshot>;

    async fn events_since(
        &self,
        contract: &Address,
        game: GameId,
        from_block: u64,
    ) -> ClientResult<EventBatch>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_crypto::hashes::selector;
    use shroud_crypto::{FieldElement, ProofA, ProofB, ProofC};

    #[test]
    fn move_hidden_encodes_proof_in_wire_order() {
        let f = FieldElement::from_u64;
        let proof = ProofArgs {
            a: ProofA { x: f(1), y: f(2) },
            b: ProofB {
                row0: [f(3), f(4)],
                row1: [f(5), f(6)],
            },
            c: ProofC { x: f(7), y: f(8) },
            public_signals: vec![f(9), f(10)],
        };
        let call = LedgerCall::MoveHidden {
            game: 1,
            unit: 2,
            proof,
        };
        let data = call.encode();
        assert_eq!(&data[..4], &selector(&call.signature()));
        let words: Vec<u64> = data[4..]
            .chunks(32)
            .map(|w| abi::read_u64(w).unwrap())
            .collect();
        assert_eq!(words, vec![1, 2, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn reveal_carries_salt_last() {
        let call = LedgerCall::RevealUnit {
            game: 4,
            unit: 1,
            location: Location::new(4, 3),
            salt: Salt::from_u64(7),
        };
        let data = call.encode();
        assert_eq!(data.len(), 4 + 5 * 32);
        assert_eq!(abi::read_u64(&data[4 + 4 * 32..]).unwrap(), 7);
        assert_eq!(call.game(), Some(4));
        assert_eq!(LedgerCall::CreateGame.game(), None);
    }
}
