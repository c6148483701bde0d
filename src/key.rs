use shakmaty::{Chess, EnPassantMode, fen::Fen};

/// Canonical key for transposition detection: the piece-placement field
/// of the FEN, nothing else. Side to move is deliberately excluded (the
/// store keeps one table per side); castling rights, the en-passant
/// square and the move counters are excluded so that move orders
/// reaching the same placement collapse to one entry.
pub fn position_key(pos: &Chess) -> String {
    let fen = Fen::from_position(pos, EnPassantMode::Legal).to_string();
    match fen.split_once(' ') {
        Some((placement, _)) => placement.to_string(),
        None => fen,
    }
}
