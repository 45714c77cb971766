//! Solidity ABI encoding for the game contract.
//!
//! Only static types are sent: every argument is one or more 32-byte words
//! after the selector. `getUnits` returns a dynamic array of static tuples.

use shroud_crypto::hashes::{keccak256, selector};
use shroud_crypto::{Commitment, FieldElement};

use crate::error::{ClientError, ClientResult};
use crate::ledger::{ChainPlacement, ChainUnit, GameEvent};
use crate::types::{Address, GameId, Location};

pub const WORD: usize = 32;

pub const CREATE_GAME: &str = "createGame()";
pub const JOIN_GAME: &str = "joinGame(uint256)";
pub const MOVE_PIECE: &str = "movePiece(uint256,uint256,uint256,uint256)";
pub const PLACE_HIDDEN: &str = "placeHidden(uint256,uint256,uint256)";
pub const REVEAL_UNIT: &str = "revealUnit(uint256,uint256,uint256,uint256,uint256)";
pub const GET_UNITS: &str = "getUnits(uint256)";

pub const EVENT_CREATED_GAME: &str = "CreatedGame(uint256,address)";
pub const EVENT_GAME_START: &str = "GameStart(uint256)";
pub const EVENT_ACTION_MADE: &str = "ActionMade(uint256,address)";
pub const EVENT_GAME_FINISHED: &str = "GameFinished(uint256,address)";

/// `moveHidden` takes the proof as fixed-size arrays, so its signature
/// depends on the number of public signals.
pub fn move_hidden_signature(public_signals: usize) -> String {
    format!("moveHidden(uint256,uint256,uint256[2],uint256[2][2],uint256[2],uint256[{public_signals}])")
}

pub type Word = [u8; WORD];

pub fn word_u64(value: u64) -> Word {
    let mut out = [0u8; WORD];
    out[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    out
}

pub fn word_address(address: &Address) -> Word {
    let mut out = [0u8; WORD];
    out[WORD - 20..].copy_from_slice(address.as_bytes());
    out
}

/// Coordinates go out as their field representative, matching what the
/// circuit and the commitment see.
pub fn word_coordinate(value: i64) -> Word {
    FieldElement::from_i64(value).to_be_bytes()
}

pub fn word_field(value: &FieldElement) -> Word {
    value.to_be_bytes()
}

pub fn calldata(signature: &str, words: &[Word]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + words.len() * WORD);
    out.extend_from_slice(&selector(signature));
    for word in words {
        out.extend_from_slice(word);
    }
    out
}

pub fn location_words(location: &Location) -> [Word; 2] {
    [word_coordinate(location.row), word_coordinate(location.col)]
}

pub fn get_units_call(game: GameId) -> Vec<u8> {
    calldata(GET_UNITS, &[word_u64(game)])
}

pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

fn word_at(data: &[u8], index: usize) -> ClientResult<&[u8]> {
    let start = index * WORD;
    data.get(start..start + WORD).ok_or_else(|| {
        ClientError::Ledger(format!(
            "abi data truncated: need word {index}, have {} bytes",
            data.len()
        ))
    })
}

fn check_word(word: &[u8]) -> ClientResult<()> {
    if word.len() != WORD {
        return Err(ClientError::Ledger(format!(
            "abi word must be {WORD} bytes, got {}",
            word.len()
        )));
    }
    Ok(())
}

pub fn read_u64(word: &[u8]) -> ClientResult<u64> {
    check_word(word)?;
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(ClientError::Ledger("abi word does not fit in u64".into()));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[WORD - 8..]);
    Ok(u64::from_be_bytes(bytes))
}

pub fn read_address(word: &[u8]) -> ClientResult<Address> {
    check_word(word)?;
    if word[..WORD - 20].iter().any(|b| *b != 0) {
        return Err(ClientError::Ledger("abi word is not an address".into()));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[WORD - 20..]);
    Ok(Address(bytes))
}

/// Reads a coordinate written by [`word_coordinate`]; negatives arrive as
/// `p - |x|`.
pub fn read_coordinate(word: &[u8]) -> ClientResult<i64> {
    let field = FieldElement::from_be_bytes_canonical(word)?;
    field
        .to_i64()
        .ok_or_else(|| ClientError::Ledger(format!("coordinate {field} out of range")))
}

/// Decodes the return value of `getUnits(uint256)`:
/// `(uint256 id, address owner, bool hidden, uint256 row, uint256 col, uint256 commitment)[]`.
pub fn decode_units(data: &[u8]) -> ClientResult<Vec<ChainUnit>> {
    const FIELDS: usize = 6;
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let offset = read_u64(word_at(data, 0)?)? as usize;
    if offset % WORD != 0 {
        return Err(ClientError::Ledger(format!("misaligned array offset {offset}")));
    }
    let body = data
        .get(offset..)
        .ok_or_else(|| ClientError::Ledger("array offset past end of data".into()))?;
    let len = read_u64(word_at(body, 0)?)?;
    let available = (body.len() / WORD).saturating_sub(1) / FIELDS;
    if len > available as u64 {
        return Err(ClientError::Ledger(format!(
            "unit array claims {len} entries, data holds at most {available}"
        )));
    }
    let len = len as usize;
    let mut units = Vec::with_capacity(len);
    for i in 0..len {
        let base = 1 + i * FIELDS;
        let id = read_u64(word_at(body, base)?)?;
        let owner = read_address(word_at(body, base + 1)?)?;
        let hidden = read_u64(word_at(body, base + 2)?)? != 0;
        let placement = if hidden {
            let commitment = Commitment::from_be_bytes(word_at(body, base + 5)?)?;
            ChainPlacement::Hidden(commitment)
        } else {
            ChainPlacement::Public(Location::new(
                read_coordinate(word_at(body, base + 3)?)?,
                read_coordinate(word_at(body, base + 4)?)?,
            ))
        };
        units.push(ChainUnit {
            id,
            owner,
            placement,
        });
    }
    Ok(units)
}

/// Decodes a contract log. Returns `None` for events this client ignores.
pub fn decode_event(topic0: &[u8], data: &[u8]) -> ClientResult<Option<GameEvent>> {
    let event = if topic0 == event_topic(EVENT_CREATED_GAME) {
        GameEvent::CreatedGame {
            game: read_u64(word_at(data, 0)?)?,
            creator: read_address(word_at(data, 1)?)?,
        }
    } else if topic0 == event_topic(EVENT_GAME_START) {
        GameEvent::GameStart {
            game: read_u64(word_at(data, 0)?)?,
        }
    } else if topic0 == event_topic(EVENT_ACTION_MADE) {
        GameEvent::ActionMade {
            game: read_u64(word_at(data, 0)?)?,
            player: read_address(word_at(data, 1)?)?,
        }
    } else if topic0 == event_topic(EVENT_GAME_FINISHED) {
        GameEvent::GameFinished {
            game: read_u64(word_at(data, 0)?)?,
            winner: read_address(word_at(data, 1)?)?,
        }
    } else {
        return Ok(None);
    };
    Ok(Some(event))
}

/// Encodes a unit list the way the contract returns it. Used by tests and
/// local ledgers.
pub fn encode_units(units: &[ChainUnit]) -> Vec<u8> {
    let mut out = Vec::with_capacity(WORD * (2 + units.len() * 6));
    out.extend_from_slice(&word_u64(WORD as u64));
    out.extend_from_slice(&word_u64(units.len() as u64));
    for unit in units {
        out.extend_from_slice(&word_u64(unit.id));
        out.extend_from_slice(&word_address(&unit.owner));
        match &unit.placement {
            ChainPlacement::Public(location) => {
                out.extend_from_slice(&word_u64(0));
                for word in location_words(location) {
                    out.extend_from_slice(&word);
                }
                out.extend_from_slice(&[0u8; WORD]);
            }
            ChainPlacement::Hidden(commitment) => {
                out.extend_from_slice(&word_u64(1));
                out.extend_from_slice(&[0u8; WORD]);
                out.extend_from_slice(&[0u8; WORD]);
                out.extend_from_slice(&commitment.to_be_bytes());
            }
        }
    }
    out
}
