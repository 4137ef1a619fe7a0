//! Splitting a command set and an optional data set into P-DATA-TF
//! PDUs that respect a negotiated maximum PDU length.
//!
//! Grounded on [`crate::association::pdata::PDataWriter`] (the
//! `ul` crate's socket-bound fragment writer): the same chunking
//! arithmetic, but producing [`Pdu`] values in memory rather than
//! writing straight to a socket, so it can be used ahead of a transport
//! a DIMSE exchange may not yet have sent to (batching, retries) and is
//! unit-testable on its own.

use dcmnet_ul::pdu::{PDataValue, PDataValueType};
use dcmnet_ul::Pdu;

/// Per-PDU overhead subtracted from the negotiated max PDU length to
/// get the maximum PDV payload: 6-byte PDU header plus the 4-byte PDV
/// length prefix and 2-byte (context id + control) PDV header.
const PDV_OVERHEAD: u32 = 6 + 4 + 2;

/// Split a command set (and optional data set) addressed to one
/// presentation context into the P-DATA-TF PDUs needed to carry it
/// without exceeding `max_pdu_size`.
///
/// The command is always split first (PS3.8 Section 9.3.1): every PDU
/// it produces precedes every data PDU. `is_last_fragment` (`is_last`)
/// is set only on the final command fragment and the final data
/// fragment, respectively.
pub fn fragment(
    command_set: &[u8],
    data_set: Option<&[u8]>,
    presentation_context_id: u8,
    max_pdu_size: u32,
) -> Vec<Pdu> {
    let max_fragment = max_fragment_size(max_pdu_size);
    let mut pdus = Vec::new();

    split_into(
        command_set,
        max_fragment,
        PDataValueType::Command,
        presentation_context_id,
        &mut pdus,
    );
    if let Some(data_set) = data_set {
        split_into(
            data_set,
            max_fragment,
            PDataValueType::Data,
            presentation_context_id,
            &mut pdus,
        );
    }

    pdus
}

/// The maximum size of a single PDV payload for a P-DATA-TF PDU bound
/// by `max_pdu_size`.
pub fn max_fragment_size(max_pdu_size: u32) -> usize {
    max_pdu_size.saturating_sub(PDV_OVERHEAD).max(1) as usize
}

fn split_into(
    bytes: &[u8],
    max_fragment: usize,
    value_type: PDataValueType,
    presentation_context_id: u8,
    out: &mut Vec<Pdu>,
) {
    if bytes.is_empty() {
        out.push(Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type,
                is_last: true,
                data: Vec::new(),
            }],
        });
        return;
    }

    let mut offset = 0;
    while offset < bytes.len() {
        let end = (offset + max_fragment).min(bytes.len());
        let is_last = end == bytes.len();
        out.push(Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type,
                is_last,
                data: bytes[offset..end].to_vec(),
            }],
        });
        offset = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdv(pdu: &Pdu) -> &PDataValue {
        match pdu {
            Pdu::PData { data } => &data[0],
            _ => panic!("expected PData"),
        }
    }

    #[test]
    fn single_fragment_for_small_payload() {
        let cmd = vec![1, 2, 3];
        let pdus = fragment(&cmd, None, 1, 16384);
        assert_eq!(pdus.len(), 1);
        let v = pdv(&pdus[0]);
        assert_eq!(v.value_type, PDataValueType::Command);
        assert!(v.is_last);
        assert_eq!(v.data, cmd);
    }

    #[test]
    fn command_precedes_data_and_each_is_last_fragment_once() {
        let cmd = vec![0u8; 10];
        let data = vec![1u8; 10];
        let pdus = fragment(&cmd, Some(&data), 3, 16384);
        assert_eq!(pdus.len(), 2);
        assert_eq!(pdv(&pdus[0]).value_type, PDataValueType::Command);
        assert!(pdv(&pdus[0]).is_last);
        assert_eq!(pdv(&pdus[1]).value_type, PDataValueType::Data);
        assert!(pdv(&pdus[1]).is_last);
    }

    #[test]
    fn large_data_set_splits_across_several_pdus_within_bound() {
        let data: Vec<u8> = (0..6000u32).map(|x| x as u8).collect();
        let max_pdu_size = 256;
        let pdus = fragment(&[], Some(&data), 7, max_pdu_size);

        // first PDU is the (empty) command fragment
        assert_eq!(pdv(&pdus[0]).value_type, PDataValueType::Command);

        let data_pdus = &pdus[1..];
        assert!(data_pdus.len() > 1);
        for (i, pdu) in data_pdus.iter().enumerate() {
            let v = pdv(pdu);
            assert_eq!(v.value_type, PDataValueType::Data);
            assert!(v.data.len() <= max_fragment_size(max_pdu_size));
            assert_eq!(v.is_last, i == data_pdus.len() - 1);
        }

        let reassembled: Vec<u8> = data_pdus.iter().flat_map(|p| pdv(p).data.clone()).collect();
        assert_eq!(reassembled, data);
    }

    #[test]
    fn every_emitted_pdu_body_is_within_max_pdu_size() {
        let cmd: Vec<u8> = (0..4000u32).map(|x| x as u8).collect();
        let data: Vec<u8> = (0..9000u32).map(|x| (x % 251) as u8).collect();
        let max_pdu_size = 512;
        for pdu in fragment(&cmd, Some(&data), 5, max_pdu_size) {
            let v = pdv(&pdu);
            // PDU body = 4 (PDV length) + 2 (pc id + control) + payload
            assert!(6 + v.data.len() as u32 <= max_pdu_size);
        }
    }
}
