// Walbi serial protocol: messages, error codes and per-revision schemas.

/* ───── Messages ────────────────────────────────────────────────────── */

/// Every message the protocol knows about, independent of its opcode.
///
/// The byte on the wire depends on the protocol revision; see [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Message {
    Ok,
    Nok,
    Connect,
    AlreadyConnected,
    Reset,
    Step,
    Action,
    State,
    Close,
    Info,
    Error,
    Version,
    Set,
}

/// Reason attached to an outgoing ERROR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    ReceivedUnknownMessage,
    ExpectedOk,
    ExpectedAction,
    DidNotExpectOk,
    DidNotExpectNok,
    DidNotExpectMessage,
    NotImplementedYet,
    SensorErrorWeight,
    SensorErrorImu,
    InvalidParameter,
}

/// Which optional sections a STATE frame carries after the timestamp and positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StateLayout {
    pub freshness: bool,
    pub plausibility: bool,
    pub weights: bool,
    pub imu: bool,
}

/* ───── SET parameters ──────────────────────────────────────────────── */
pub const SET_INTAKE_INTERVAL: i8 = 0;
pub const SET_REFRESH_INTERVAL: i8 = 1;
pub const SET_PUSH_INTERVAL: i8 = 2;

/* ───── Schema ──────────────────────────────────────────────────────── */

/// One closed protocol revision. Opcodes are renumbered between revisions,
/// so a byte only has meaning together with the schema it was sent under.
#[derive(Debug)]
pub struct Schema {
    pub version: i8,
    opcodes: &'static [(Message, u8)],
    error_codes: &'static [(ErrorCode, i8)],
    pub action_has_activate: bool,
    pub state_layout: StateLayout,
    pub pushes_state: bool,
}

impl Schema {
    pub fn decode(&self, byte: u8) -> Option<Message> {
        self.opcodes
            .iter()
            .find(|(_, op)| *op == byte)
            .map(|(msg, _)| *msg)
    }

    pub fn opcode(&self, msg: Message) -> Option<u8> {
        self.opcodes
            .iter()
            .find(|(m, _)| *m == msg)
            .map(|(_, op)| *op)
    }

    /// Codes a revision does not know fall back to RECEIVED_UNKNOWN_MESSAGE,
    /// which every revision defines as 0.
    pub fn error_code(&self, code: ErrorCode) -> i8 {
        self.error_codes
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, raw)| *raw)
            .unwrap_or(0)
    }

    pub fn reason(&self, raw: i8) -> Option<ErrorCode> {
        self.error_codes
            .iter()
            .find(|(_, r)| *r == raw)
            .map(|(c, _)| *c)
    }

    /// Bytes of an ACTION/STEP payload.
    pub fn action_len(&self, motors: usize) -> usize {
        motors * if self.action_has_activate { 5 } else { 4 }
    }

    /// Bytes of a STATE payload, opcode excluded.
    pub fn state_len(&self, motors: usize, imu_axes: usize) -> usize {
        let l = &self.state_layout;
        let per_motor = 2 + l.freshness as usize;
        4 + motors * per_motor
            + l.plausibility as usize
            + if l.weights { 8 } else { 0 }
            + if l.imu { 2 * imu_axes } else { 0 }
    }
}

/* ───── Revision 3 ──────────────────────────────────────────────────── */
pub const V3: Schema = Schema {
    version: 3,
    opcodes: &[
        (Message::Ok, 1),
        (Message::Connect, 2),
        (Message::AlreadyConnected, 3),
        (Message::Reset, 4),
        (Message::Step, 5),
        (Message::Action, 6),
        (Message::State, 7),
        (Message::Close, 8),
        (Message::Info, 9),
        (Message::Error, 10),
        (Message::Version, 11),
    ],
    error_codes: &[
        (ErrorCode::ReceivedUnknownMessage, 0),
        (ErrorCode::ExpectedOk, 1),
        (ErrorCode::ExpectedAction, 2),
        (ErrorCode::DidNotExpectOk, 3),
        (ErrorCode::NotImplementedYet, 4),
    ],
    action_has_activate: false,
    state_layout: StateLayout {
        freshness: false,
        plausibility: false,
        weights: false,
        imu: false,
    },
    pushes_state: false,
};

/* ───── Revision 4 ──────────────────────────────────────────────────── */
const V4_OPCODES: &[(Message, u8)] = &[
    (Message::Ok, 1),
    (Message::Nok, 2),
    (Message::Connect, 3),
    (Message::AlreadyConnected, 4),
    (Message::Reset, 5),
    (Message::Step, 6),
    (Message::Action, 7),
    (Message::State, 8),
    (Message::Close, 9),
    (Message::Info, 10),
    (Message::Error, 11),
    (Message::Version, 12),
];

const V4_ERROR_CODES: &[(ErrorCode, i8)] = &[
    (ErrorCode::ReceivedUnknownMessage, 0),
    (ErrorCode::ExpectedOk, 1),
    (ErrorCode::DidNotExpectOk, 2),
    (ErrorCode::DidNotExpectNok, 3),
    (ErrorCode::DidNotExpectMessage, 4),
    (ErrorCode::NotImplementedYet, 5),
];

pub const V4: Schema = Schema {
    version: 4,
    opcodes: V4_OPCODES,
    error_codes: V4_ERROR_CODES,
    action_has_activate: false,
    state_layout: StateLayout {
        freshness: true,
        plausibility: false,
        weights: false,
        imu: false,
    },
    pushes_state: false,
};

/* ───── Revision 6 (current) ────────────────────────────────────────── */
pub const V6: Schema = Schema {
    version: 6,
    opcodes: &[
        (Message::Ok, 1),
        (Message::Nok, 2),
        (Message::Connect, 3),
        (Message::AlreadyConnected, 4),
        (Message::Reset, 5),
        (Message::Step, 6),
        (Message::Action, 7),
        (Message::State, 8),
        (Message::Close, 9),
        (Message::Info, 10),
        (Message::Error, 11),
        (Message::Version, 12),
        (Message::Set, 13),
    ],
    error_codes: &[
        (ErrorCode::ReceivedUnknownMessage, 0),
        (ErrorCode::ExpectedOk, 1),
        (ErrorCode::DidNotExpectOk, 2),
        (ErrorCode::DidNotExpectNok, 3),
        (ErrorCode::DidNotExpectMessage, 4),
        (ErrorCode::NotImplementedYet, 5),
        (ErrorCode::SensorErrorWeight, 6),
        (ErrorCode::SensorErrorImu, 7),
        (ErrorCode::InvalidParameter, 8),
    ],
    action_has_activate: true,
    state_layout: StateLayout {
        freshness: true,
        plausibility: true,
        weights: true,
        imu: true,
    },
    pushes_state: true,
};

pub const CURRENT: &Schema = &V6;
