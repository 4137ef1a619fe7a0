use crate::pdu::reader::*;
use crate::pdu::writer::*;
use crate::pdu::*;
use std::io::Cursor;

#[test]
fn can_read_write_associate_rq() {
    let association_rq = Pdu::AssociationRQ(AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "calling ae".to_string(),
        called_ae_title: "called ae".to_string(),
        application_context_name: "application context name".to_string(),
        presentation_contexts: vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: "abstract 1".to_string(),
                transfer_syntaxes: vec!["transfer 1".to_string(), "transfer 2".to_string()],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: "abstract 2".to_string(),
                transfer_syntaxes: vec!["transfer 3".to_string(), "transfer 4".to_string()],
            },
        ],
        user_variables: vec![
            UserVariableItem::ImplementationClassUID("class uid".to_string()),
            UserVariableItem::ImplementationVersionName("version name".to_string()),
            UserVariableItem::MaxLength(23),
        ],
    });

    let mut bytes = vec![0u8; 0];
    write_pdu(&mut bytes, &association_rq).unwrap();

    let result = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true).unwrap();

    let Pdu::AssociationRQ(AssociationRQ {
        protocol_version,
        calling_ae_title,
        called_ae_title,
        application_context_name,
        presentation_contexts,
        user_variables,
    }) = result
    else {
        panic!("expected an A-ASSOCIATE-RQ PDU, got {:?}", result);
    };

    assert_eq!(protocol_version, 1);
    assert_eq!(calling_ae_title, "calling ae");
    assert_eq!(called_ae_title, "called ae");
    assert_eq!(application_context_name, "application context name");
    assert_eq!(presentation_contexts.len(), 2);
    assert_eq!(presentation_contexts[0].abstract_syntax, "abstract 1");
    assert_eq!(presentation_contexts[0].transfer_syntaxes.len(), 2);
    assert_eq!(presentation_contexts[0].transfer_syntaxes[0], "transfer 1");
    assert_eq!(presentation_contexts[0].transfer_syntaxes[1], "transfer 2");
    assert_eq!(presentation_contexts[1].abstract_syntax, "abstract 2");
    assert_eq!(presentation_contexts[1].transfer_syntaxes.len(), 2);
    assert_eq!(presentation_contexts[1].transfer_syntaxes[0], "transfer 3");
    assert_eq!(presentation_contexts[1].transfer_syntaxes[1], "transfer 4");
    assert_eq!(user_variables.len(), 3);
    assert!(matches!(
        user_variables[0],
        UserVariableItem::ImplementationClassUID(_)
    ));
    assert!(matches!(
        user_variables[1],
        UserVariableItem::ImplementationVersionName(_)
    ));
    assert!(matches!(user_variables[2], UserVariableItem::MaxLength(_)));
}

#[test]
fn can_read_write_associate_ac() {
    let association_ac = Pdu::AssociationAC(AssociationAC {
        protocol_version: 1,
        application_context_name: "application context name".to_string(),
        calling_ae_title: "calling ae".to_string(),
        called_ae_title: "called ae".to_string(),
        presentation_contexts: vec![PresentationContextResult {
            id: 1,
            reason: PresentationContextResultReason::Acceptance,
            transfer_syntax: "1.2.840.10008.1.2".to_string(),
        }],
        user_variables: vec![UserVariableItem::MaxLength(16_384)],
    });

    let mut bytes = vec![];
    write_pdu(&mut bytes, &association_ac).unwrap();
    let result = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true).unwrap();

    let Pdu::AssociationAC(AssociationAC {
        presentation_contexts,
        ..
    }) = result
    else {
        panic!("expected an A-ASSOCIATE-AC PDU, got {:?}", result);
    };
    assert_eq!(presentation_contexts.len(), 1);
    assert_eq!(presentation_contexts[0].transfer_syntax, "1.2.840.10008.1.2");
    assert!(presentation_contexts[0].reason.is_acceptance());
}

#[test]
fn can_read_write_associate_rj() {
    let rj = Pdu::AssociationRJ(AssociationRJ {
        result: AssociationRJResult::Permanent,
        source: AssociationRJSource::ServiceUser(
            AssociationRJServiceUserReason::CalledAETitleNotRecognized,
        ),
    });
    let mut bytes = vec![];
    write_pdu(&mut bytes, &rj).unwrap();
    let result = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true).unwrap();
    assert_eq!(result, rj);
}

#[test]
fn can_read_write_pdata() {
    let pdata_rq = Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: 3,
            value_type: PDataValueType::Command,
            is_last: true,
            data: vec![0, 0, 0, 0],
        }],
    };

    let mut bytes = vec![0u8; 0];
    write_pdu(&mut bytes, &pdata_rq).unwrap();

    let result = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true).unwrap();

    let Pdu::PData { data } = result else {
        panic!("expected a P-DATA-TF PDU, got {:?}", result);
    };
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].presentation_context_id, 3);
    assert!(matches!(data[0].value_type, PDataValueType::Command));
    assert!(data[0].is_last);
    assert_eq!(data[0].data, vec![0, 0, 0, 0]);
}

#[test]
fn can_read_write_release_and_abort() {
    let mut bytes = vec![];
    write_pdu(&mut bytes, &Pdu::ReleaseRQ).unwrap();
    assert_eq!(
        read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true).unwrap(),
        Pdu::ReleaseRQ
    );

    let mut bytes = vec![];
    write_pdu(&mut bytes, &Pdu::ReleaseRP).unwrap();
    assert_eq!(
        read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true).unwrap(),
        Pdu::ReleaseRP
    );

    let abort = Pdu::AbortRQ {
        source: AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu),
    };
    let mut bytes = vec![];
    write_pdu(&mut bytes, &abort).unwrap();
    assert_eq!(
        read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true).unwrap(),
        abort
    );
}
