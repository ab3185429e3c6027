//! C-STORE 接收端
//!
//! 归档执行“发送到工作站”（C-MOVE 目标）时，会以本工作站的AE标题建立
//! DICOM关联并逐个推送 C-STORE 请求。这里处理一个已接受的TCP连接上的
//! 完整关联：C-ECHO 直接应答，C-STORE 的数据集解码成接收记录后应答成功。
//!
//! 上层协议（关联协商、PDU编解码）由 `dicom-ul` 完成，运行在阻塞线程上。

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::{tags, uids};
use dicom::encoding::TransferSyntaxIndex;
use dicom::object::InMemDicomObject;
use dicom::transfer_syntax::{entries, TransferSyntaxRegistry};
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu};
use dicom_ul::ServerAssociationOptions;
use radsim_core::{RadSimError, ReceivedImageRecord, Result};
use std::net::TcpStream;
use tracing::{debug, info, warn};

use crate::dataset::notification_from_dataset;
use crate::receiver::ReceivedImageLog;

/// A-ASSOCIATE-RQ 的PDU类型字节，用于区分DICOM连接和JSON行连接
pub const ASSOCIATE_RQ_PDU_TYPE: u8 = 0x01;

/// 不附带数据集（CommandDataSetType）
const NO_DATA_SET: u16 = 0x0101;

/// 关联中接受的存储类；其他抽象语法也会被接受（混杂模式）
const STORAGE_ABSTRACT_SYNTAXES: &[&str] = &[
    uids::VERIFICATION,
    uids::CT_IMAGE_STORAGE,
    uids::MR_IMAGE_STORAGE,
    uids::ULTRASOUND_IMAGE_STORAGE,
    uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
];

/// DIMSE命令字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandField {
    CStore,
    CEcho,
    Other(u16),
}

impl CommandField {
    fn from_code(code: u16) -> Self {
        match code {
            0x0001 => CommandField::CStore,
            0x0030 => CommandField::CEcho,
            other => CommandField::Other(other),
        }
    }

    fn response_code(&self) -> Option<u16> {
        match self {
            CommandField::CStore => Some(0x8001),
            CommandField::CEcho => Some(0x8030),
            CommandField::Other(_) => None,
        }
    }
}

/// DIMSE状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimseStatus {
    Success,
    CannotUnderstand,
}

impl DimseStatus {
    fn code(&self) -> u16 {
        match self {
            DimseStatus::Success => 0x0000,
            DimseStatus::CannotUnderstand => 0xC000,
        }
    }
}

/// 解码后的DIMSE请求命令
#[derive(Debug, Clone, PartialEq)]
pub struct DimseCommand {
    pub command_field: CommandField,
    pub message_id: u16,
    pub affected_sop_class_uid: String,
    pub affected_sop_instance_uid: String,
    pub has_dataset: bool,
}

/// 解码命令集（命令总是隐式VR小端）
pub fn parse_command(bytes: &[u8]) -> Result<DimseCommand> {
    let command: InMemDicomObject =
        InMemDicomObject::read_dataset_with_ts(bytes, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .map_err(|e| RadSimError::Validation(format!("无法解码DIMSE命令: {}", e)))?;

    let int = |tag: Tag| {
        command
            .element(tag)
            .ok()
            .and_then(|e| e.to_int::<u16>().ok())
    };
    let text = |tag: Tag| {
        command
            .element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|v| v.trim_end_matches('\0').trim().to_string())
            .unwrap_or_default()
    };

    let code = int(tags::COMMAND_FIELD)
        .ok_or_else(|| RadSimError::Validation("DIMSE命令缺少 CommandField".to_string()))?;

    Ok(DimseCommand {
        command_field: CommandField::from_code(code),
        message_id: int(tags::MESSAGE_ID).unwrap_or(0),
        affected_sop_class_uid: text(tags::AFFECTED_SOP_CLASS_UID),
        affected_sop_instance_uid: text(tags::AFFECTED_SOP_INSTANCE_UID),
        has_dataset: int(tags::COMMAND_DATA_SET_TYPE).map_or(false, |t| t != NO_DATA_SET),
    })
}

/// 编码对某个请求的应答命令集
pub fn response_command(request: &DimseCommand, status: DimseStatus) -> Result<Vec<u8>> {
    let response_code = request.command_field.response_code().ok_or_else(|| {
        RadSimError::Validation(format!("不支持的DIMSE命令: {:?}", request.command_field))
    })?;

    let mut elements = vec![
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(request.affected_sop_class_uid.as_str()),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, PrimitiveValue::from(response_code)),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            PrimitiveValue::from(request.message_id),
        ),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, PrimitiveValue::from(NO_DATA_SET)),
        DataElement::new(tags::STATUS, VR::US, PrimitiveValue::from(status.code())),
    ];
    if !request.affected_sop_instance_uid.is_empty() {
        elements.push(DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(request.affected_sop_instance_uid.as_str()),
        ));
    }

    let command = InMemDicomObject::command_from_element_iter(elements);
    let mut bytes = Vec::new();
    command
        .write_dataset_with_ts(&mut bytes, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .map_err(|e| RadSimError::Internal(format!("无法编码DIMSE应答: {}", e)))?;
    Ok(bytes)
}

/// 用协商好的传输语法解码数据集并写入接收缓存
pub fn ingest_dataset(
    log: &ReceivedImageLog,
    bytes: &[u8],
    transfer_syntax_uid: &str,
) -> Result<ReceivedImageRecord> {
    let uid = transfer_syntax_uid.trim_end_matches('\0').trim();
    let ts = TransferSyntaxRegistry
        .get(uid)
        .ok_or_else(|| RadSimError::Validation(format!("不支持的传输语法: {}", uid)))?;
    let dataset: InMemDicomObject = InMemDicomObject::read_dataset_with_ts(bytes, ts)
        .map_err(|e| RadSimError::Validation(format!("无法解码数据集: {}", e)))?;
    Ok(log.record_notification(notification_from_dataset(&dataset)))
}

/// 处理一个DICOM关联直到对端释放或中止，返回收到的实例数
///
/// 阻塞调用，由监听器放到阻塞线程池执行。
pub fn serve_association(stream: TcpStream, ae_title: &str, log: &ReceivedImageLog) -> Result<usize> {
    let mut options = ServerAssociationOptions::new()
        .accept_any()
        .ae_title(ae_title)
        .promiscuous(true);
    for abstract_syntax in STORAGE_ABSTRACT_SYNTAXES {
        options = options.with_abstract_syntax(*abstract_syntax);
    }

    let mut association = options
        .establish(stream)
        .map_err(|e| RadSimError::Validation(format!("DICOM关联协商失败: {}", e)))?;
    debug!("DICOM关联已建立: AE={}", ae_title);

    let mut command_bytes = Vec::new();
    let mut dataset_bytes = Vec::new();
    let mut pending: Option<(u8, DimseCommand)> = None;
    let mut stored = 0;

    loop {
        let pdu = match association.receive() {
            Ok(pdu) => pdu,
            Err(e) => {
                debug!("DICOM关联结束: {}", e);
                break;
            }
        };

        match pdu {
            Pdu::PData { data } => {
                for value in data {
                    let context_id = value.presentation_context_id;
                    let is_last = value.is_last;
                    match value.value_type {
                        PDataValueType::Command => {
                            command_bytes.extend_from_slice(&value.data);
                            if !is_last {
                                continue;
                            }
                            let command = parse_command(&command_bytes);
                            command_bytes.clear();
                            let command = match command {
                                Ok(command) => command,
                                Err(e) => {
                                    warn!("丢弃无法解码的DIMSE命令: {}", e);
                                    continue;
                                }
                            };
                            if command.has_dataset {
                                dataset_bytes.clear();
                                pending = Some((context_id, command));
                                continue;
                            }
                            let status = match command.command_field {
                                CommandField::CEcho => DimseStatus::Success,
                                _ => DimseStatus::CannotUnderstand,
                            };
                            if let Some(pdu) = response_pdu(context_id, &command, status) {
                                association
                                    .send(&pdu)
                                    .map_err(|e| RadSimError::Internal(format!("发送DIMSE应答失败: {}", e)))?;
                            }
                        }
                        PDataValueType::Data => {
                            dataset_bytes.extend_from_slice(&value.data);
                            if !is_last {
                                continue;
                            }
                            let Some((context_id, command)) = pending.take() else {
                                warn!("丢弃没有对应命令的数据集");
                                dataset_bytes.clear();
                                continue;
                            };

                            let transfer_syntax = association
                                .presentation_contexts()
                                .iter()
                                .find(|pc| pc.id == context_id)
                                .map(|pc| pc.transfer_syntax.clone())
                                .unwrap_or_default();

                            let status = match command.command_field {
                                CommandField::CStore => {
                                    match ingest_dataset(log, &dataset_bytes, &transfer_syntax) {
                                        Ok(record) => {
                                            stored += 1;
                                            info!(
                                                patient_id = %record.patient_id,
                                                study = %record.study_instance_uid,
                                                "received instance via C-STORE"
                                            );
                                            DimseStatus::Success
                                        }
                                        Err(e) => {
                                            warn!(sop_instance = %command.affected_sop_instance_uid, "C-STORE数据集无效: {}", e);
                                            DimseStatus::CannotUnderstand
                                        }
                                    }
                                }
                                _ => DimseStatus::CannotUnderstand,
                            };
                            dataset_bytes.clear();

                            if let Some(pdu) = response_pdu(context_id, &command, status) {
                                association
                                    .send(&pdu)
                                    .map_err(|e| RadSimError::Internal(format!("发送DIMSE应答失败: {}", e)))?;
                            }
                        }
                    }
                }
            }
            Pdu::ReleaseRQ => {
                if let Err(e) = association.send(&Pdu::ReleaseRP) {
                    debug!("发送释放应答失败: {}", e);
                }
                break;
            }
            Pdu::AbortRQ { .. } => {
                debug!("对端中止DICOM关联");
                break;
            }
            other => {
                debug!("忽略意外的PDU: {:?}", other);
            }
        }
    }

    Ok(stored)
}

fn response_pdu(context_id: u8, request: &DimseCommand, status: DimseStatus) -> Option<Pdu> {
    match response_command(request, status) {
        Ok(data) => Some(Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: context_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data,
            }],
        }),
        Err(e) => {
            warn!("无法应答DIMSE命令: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_request() -> DimseCommand {
        DimseCommand {
            command_field: CommandField::CStore,
            message_id: 7,
            affected_sop_class_uid: uids::CT_IMAGE_STORAGE.to_string(),
            affected_sop_instance_uid: "1.2.3.4".to_string(),
            has_dataset: true,
        }
    }

    #[test]
    fn test_response_round_trips_through_command_parser() {
        let bytes = response_command(&store_request(), DimseStatus::Success).unwrap();
        let response: InMemDicomObject =
            InMemDicomObject::read_dataset_with_ts(&bytes[..], &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
                .unwrap();
        assert_eq!(
            response.element(tags::COMMAND_FIELD).unwrap().to_int::<u16>().unwrap(),
            0x8001
        );
        assert_eq!(
            response
                .element(tags::MESSAGE_ID_BEING_RESPONDED_TO)
                .unwrap()
                .to_int::<u16>()
                .unwrap(),
            7
        );
        assert_eq!(response.element(tags::STATUS).unwrap().to_int::<u16>().unwrap(), 0);

        let parsed = parse_command(&bytes).unwrap();
        assert_eq!(parsed.command_field, CommandField::Other(0x8001));
        assert!(!parsed.has_dataset);
        assert_eq!(parsed.affected_sop_instance_uid, "1.2.3.4");
    }

    #[test]
    fn test_unsupported_command_has_no_response() {
        let request = DimseCommand {
            command_field: CommandField::Other(0x0020),
            ..store_request()
        };
        assert!(response_command(&request, DimseStatus::Success).is_err());
        assert!(parse_command(b"\x01\x02").is_err());
    }

    #[test]
    fn test_ingest_dataset_records_notification() {
        let dataset: InMemDicomObject = InMemDicomObject::from_element_iter([
            DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("DOE^JOHN")),
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("SUS-AAAA-1")),
            DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3")),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
        ]);
        let mut bytes = Vec::new();
        dataset
            .write_dataset_with_ts(&mut bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN.erased())
            .unwrap();

        let log = ReceivedImageLog::new();
        let record = ingest_dataset(&log, &bytes, uids::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_eq!(record.patient_id, "SUS-AAAA-1");
        assert_eq!(record.modality, "CT");
        assert_eq!(log.len(), 1);

        assert!(ingest_dataset(&log, &bytes, "1.2.3.999").is_err());
        assert_eq!(log.len(), 1);
    }
}
