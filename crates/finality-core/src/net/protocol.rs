use serde::{Deserialize, Serialize};

use super::messages::{
    AnnounceMsg, BroadcastMsg, CelebrateMsg, ConfirmationResponseMsg, CreateGroupMsg,
    CurrencyMsg, DisconnectMsg, EntityRefMsg, GroupRefMsg, GroupUpdateMsg, HelloMsg, HostMessage,
    ItemMsg, MessageType, NotifyMsg, ParticipantRefMsg, ProgressionMsg, PromptConfirmationMsg,
    RelocateMsg, ServerMessage, SpawnCreatureMsg, TitleMsg, WelcomeMsg,
};
use crate::participant::ParticipantView;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum message payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownMessageType(u8),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownMessageType(b) => write!(f, "unknown message type: 0x{b:02x}"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a serializable payload with a 1-byte type prefix.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `HostMessage` to wire format.
pub fn encode_host_message(msg: &HostMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        HostMessage::Hello(m) => encode_message(MessageType::Hello, m),
        HostMessage::ParticipantUpdate(m) => encode_message(MessageType::ParticipantUpdate, m),
        HostMessage::ParticipantRemoved(m) => encode_message(MessageType::ParticipantRemoved, m),
        HostMessage::GroupUpdate(m) => encode_message(MessageType::GroupUpdate, m),
        HostMessage::GroupDisbanded(m) => encode_message(MessageType::GroupDisbanded, m),
        HostMessage::TrialRequest(m) => encode_message(MessageType::TrialRequest, m),
        HostMessage::ConfirmationResponse(m) => {
            encode_message(MessageType::ConfirmationResponse, m)
        },
        HostMessage::ForfeitVote(m) => encode_message(MessageType::ForfeitVote, m),
        HostMessage::CreatureDefeated(m) => encode_message(MessageType::CreatureDefeated, m),
        HostMessage::ParticipantDied(m) => encode_message(MessageType::ParticipantDied, m),
        HostMessage::ParticipantResurrected(m) => {
            encode_message(MessageType::ParticipantResurrected, m)
        },
        HostMessage::ParticipantLogin(m) => encode_message(MessageType::ParticipantLogin, m),
        HostMessage::ParticipantLogout(m) => encode_message(MessageType::ParticipantLogout, m),
    }
}

/// Encode a `ServerMessage` to wire format.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ServerMessage::Welcome(m) => encode_message(MessageType::Welcome, m),
        ServerMessage::Relocate(m) => encode_message(MessageType::Relocate, m),
        ServerMessage::SpawnCreature(m) => encode_message(MessageType::SpawnCreature, m),
        ServerMessage::Despawn(m) => encode_message(MessageType::Despawn, m),
        ServerMessage::Announce(m) => encode_message(MessageType::Announce, m),
        ServerMessage::GrantItem(m) => encode_message(MessageType::GrantItem, m),
        ServerMessage::RemoveItem(m) => encode_message(MessageType::RemoveItem, m),
        ServerMessage::SetProgression(m) => encode_message(MessageType::SetProgression, m),
        ServerMessage::GrantCurrency(m) => encode_message(MessageType::GrantCurrency, m),
        ServerMessage::GrantTitle(m) => encode_message(MessageType::GrantTitle, m),
        ServerMessage::Notify(m) => encode_message(MessageType::Notify, m),
        ServerMessage::Broadcast(m) => encode_message(MessageType::Broadcast, m),
        ServerMessage::PromptConfirmation(m) => encode_message(MessageType::PromptConfirmation, m),
        ServerMessage::CreateGroup(m) => encode_message(MessageType::CreateGroup, m),
        ServerMessage::DisbandGroup(m) => encode_message(MessageType::DisbandGroup, m),
        ServerMessage::Celebrate(m) => encode_message(MessageType::Celebrate, m),
        ServerMessage::Disconnect(m) => encode_message(MessageType::Disconnect, m),
    }
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    MessageType::from_byte(data[0]).ok_or(ProtocolError::UnknownMessageType(data[0]))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `HostMessage`.
pub fn decode_host_message(data: &[u8]) -> Result<HostMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::Hello => Ok(HostMessage::Hello(decode_payload::<HelloMsg>(data)?)),
        MessageType::ParticipantUpdate => Ok(HostMessage::ParticipantUpdate(decode_payload::<
            ParticipantView,
        >(data)?)),
        MessageType::ParticipantRemoved => Ok(HostMessage::ParticipantRemoved(decode_payload::<
            ParticipantRefMsg,
        >(data)?)),
        MessageType::GroupUpdate => Ok(HostMessage::GroupUpdate(
            decode_payload::<GroupUpdateMsg>(data)?,
        )),
        MessageType::GroupDisbanded => Ok(HostMessage::GroupDisbanded(
            decode_payload::<GroupRefMsg>(data)?,
        )),
        MessageType::TrialRequest => Ok(HostMessage::TrialRequest(decode_payload::<
            ParticipantRefMsg,
        >(data)?)),
        MessageType::ConfirmationResponse => Ok(HostMessage::ConfirmationResponse(
            decode_payload::<ConfirmationResponseMsg>(data)?,
        )),
        MessageType::ForfeitVote => Ok(HostMessage::ForfeitVote(decode_payload::<
            ParticipantRefMsg,
        >(data)?)),
        MessageType::CreatureDefeated => Ok(HostMessage::CreatureDefeated(decode_payload::<
            EntityRefMsg,
        >(data)?)),
        MessageType::ParticipantDied => Ok(HostMessage::ParticipantDied(decode_payload::<
            ParticipantRefMsg,
        >(data)?)),
        MessageType::ParticipantResurrected => Ok(HostMessage::ParticipantResurrected(
            decode_payload::<ParticipantRefMsg>(data)?,
        )),
        MessageType::ParticipantLogin => Ok(HostMessage::ParticipantLogin(decode_payload::<
            ParticipantRefMsg,
        >(data)?)),
        MessageType::ParticipantLogout => Ok(HostMessage::ParticipantLogout(decode_payload::<
            ParticipantRefMsg,
        >(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

/// Decode raw wire data into a `ServerMessage`.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::Welcome => Ok(ServerMessage::Welcome(decode_payload::<WelcomeMsg>(data)?)),
        MessageType::Relocate => Ok(ServerMessage::Relocate(decode_payload::<RelocateMsg>(
            data,
        )?)),
        MessageType::SpawnCreature => Ok(ServerMessage::SpawnCreature(decode_payload::<
            SpawnCreatureMsg,
        >(data)?)),
        MessageType::Despawn => Ok(ServerMessage::Despawn(decode_payload::<EntityRefMsg>(
            data,
        )?)),
        MessageType::Announce => Ok(ServerMessage::Announce(decode_payload::<AnnounceMsg>(
            data,
        )?)),
        MessageType::GrantItem => Ok(ServerMessage::GrantItem(decode_payload::<ItemMsg>(data)?)),
        MessageType::RemoveItem => {
            Ok(ServerMessage::RemoveItem(decode_payload::<ItemMsg>(data)?))
        },
        MessageType::SetProgression => Ok(ServerMessage::SetProgression(decode_payload::<
            ProgressionMsg,
        >(data)?)),
        MessageType::GrantCurrency => Ok(ServerMessage::GrantCurrency(decode_payload::<
            CurrencyMsg,
        >(data)?)),
        MessageType::GrantTitle => {
            Ok(ServerMessage::GrantTitle(decode_payload::<TitleMsg>(data)?))
        },
        MessageType::Notify => Ok(ServerMessage::Notify(decode_payload::<NotifyMsg>(data)?)),
        MessageType::Broadcast => Ok(ServerMessage::Broadcast(decode_payload::<BroadcastMsg>(
            data,
        )?)),
        MessageType::PromptConfirmation => Ok(ServerMessage::PromptConfirmation(
            decode_payload::<PromptConfirmationMsg>(data)?,
        )),
        MessageType::CreateGroup => Ok(ServerMessage::CreateGroup(decode_payload::<
            CreateGroupMsg,
        >(data)?)),
        MessageType::DisbandGroup => Ok(ServerMessage::DisbandGroup(
            decode_payload::<GroupRefMsg>(data)?,
        )),
        MessageType::Celebrate => Ok(ServerMessage::Celebrate(decode_payload::<CelebrateMsg>(
            data,
        )?)),
        MessageType::Disconnect => Ok(ServerMessage::Disconnect(decode_payload::<
            DisconnectMsg,
        >(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}
