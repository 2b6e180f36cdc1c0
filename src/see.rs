use shakmaty::{Bitboard, Board, Chess, Color, Move, Position as _, Role, Square};

use crate::pst::{SEE_VALUE, role_index};
use crate::types::Score;

fn piece_value(role: Role) -> Score {
    SEE_VALUE[role_index(role)]
}

/// Least valuable piece of `side` among `attackers`.
fn least_valuable(board: &Board, attackers: Bitboard, side: Color) -> Option<(Square, Role)> {
    for role in [Role::Pawn, Role::Knight, Role::Bishop, Role::Rook, Role::Queen, Role::King] {
        let subset = attackers & board.by_color(side) & board.by_role(role);
        if let Some(sq) = subset.first() {
            return Some((sq, role));
        }
    }
    None
}

/// Static exchange evaluation: net material outcome of the capture sequence
/// on the target square, assuming both sides keep capturing with their least
/// valuable attacker while it pays off. Sliding x-rays are uncovered by
/// recomputing attacks against the shrinking occupancy.
pub fn see(pos: &Chess, m: &Move) -> Score {
    let (from, to) = match *m {
        Move::Normal { from, to, .. } => (from, to),
        Move::EnPassant { from, to } => (from, to),
        // Castling trades nothing
        _ => return 0,
    };

    let board = pos.board();
    let mut occupied = board.occupied();
    let mut swap = [0 as Score; 32];

    swap[0] = if m.is_en_passant() {
        let victim = Square::from_coords(to.file(), from.rank());
        occupied ^= Bitboard::from(victim);
        piece_value(Role::Pawn)
    } else {
        board.role_at(to).map_or(0, piece_value)
    };

    // The piece that now sits on the target square and can be recaptured
    let mut mover = match m.promotion() {
        Some(role) => {
            swap[0] += piece_value(role) - piece_value(Role::Pawn);
            piece_value(role)
        }
        None => piece_value(m.role()),
    };

    occupied ^= Bitboard::from(from);
    let mut side = !pos.turn();
    let mut idx = 0;

    while idx < 31 {
        let attackers = (board.attacks_to(to, Color::White, occupied)
            | board.attacks_to(to, Color::Black, occupied))
            & occupied;
        let Some((sq, role)) = least_valuable(board, attackers, side) else {
            break;
        };
        idx += 1;
        swap[idx] = mover - swap[idx - 1];
        mover = piece_value(role);
        occupied ^= Bitboard::from(sq);
        side = !side;
    }

    // Negamax the swap list back to the front: each side may stand pat
    // instead of continuing a losing sequence.
    while idx > 0 {
        swap[idx - 1] = -std::cmp::max(-swap[idx - 1], swap[idx]);
        idx -= 1;
    }
    swap[0]
}

pub fn see_ge(pos: &Chess, m: &Move, threshold: Score) -> bool {
    see(pos, m) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;

    fn capture(fen: &str, uci: &str) -> (Position, Move) {
        let pos = Position::from_fen(fen).expect("valid fen");
        let m = pos.parse_uci_move(uci).expect("legal move");
        (pos, m)
    }

    #[test]
    fn test_pawn_takes_free_pawn() {
        let (pos, m) = capture("4k3/8/8/3p4/4P3/8/8/4K3 w - - 0 1", "e4d5");
        assert_eq!(see(pos.current(), &m), 100);
        assert!(see_ge(pos.current(), &m, 0));
    }

    #[test]
    fn test_queen_takes_defended_pawn() {
        let (pos, m) = capture("4k3/8/2p5/3p4/8/8/3Q4/4K3 w - - 0 1", "d2d5");
        assert_eq!(see(pos.current(), &m), 100 - 900, "queen is lost to the pawn");
        assert!(!see_ge(pos.current(), &m, 0));
        assert!(see_ge(pos.current(), &m, -800));
    }

    #[test]
    fn test_rook_takes_free_rook() {
        let (pos, m) = capture("4k3/8/8/3r4/8/8/8/3R1K2 w - - 0 1", "d1d5");
        assert_eq!(see(pos.current(), &m), 500);
    }

    #[test]
    fn test_rook_trade_behind_pawn_defender() {
        // Rook takes rook, pawn recaptures: 500 - 500 is the best white gets
        let (pos, m) = capture("4k3/2p5/3r4/8/8/8/3R4/4K3 w - - 0 1", "d2d6");
        assert_eq!(see(pos.current(), &m), 0);
        assert!(see_ge(pos.current(), &m, 0));
        assert!(!see_ge(pos.current(), &m, 1));
    }

    #[test]
    fn test_xray_battery_counts() {
        // Two white rooks doubled on the d-file win the rook-defended pawn:
        // Rxd5 Rxd5 is refuted by the second rook recapturing.
        let (pos, m) = capture("3rk3/8/8/3p4/8/8/3R4/3RK3 w - - 0 1", "d2d5");
        assert_eq!(see(pos.current(), &m), 100 - 500 + 500);
    }

    #[test]
    fn test_en_passant_capture_value() {
        let (pos, m) = capture(
            "4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 2",
            "e5d6",
        );
        assert!(m.is_en_passant());
        assert_eq!(see(pos.current(), &m), 100);
    }

    #[test]
    fn test_quiet_move_sees_zero_or_loss() {
        // A quiet rook move to an attacked square loses the rook outright
        let (pos, m) = capture("4k3/8/2p5/8/8/8/3R4/4K3 w - - 0 1", "d2d5");
        assert_eq!(see(pos.current(), &m), -500);
    }
}
