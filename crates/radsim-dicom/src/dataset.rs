//! DICOM数据集处理
//!
//! 从数据集提取接收通知，在上传前检查实例是否可发送，按检查申请改写实例标识，
//! 以及在没有上传文件时生成一张空白CT图像。

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::{tags, uids};
use dicom::object::{DefaultDicomObject, FileMetaTableBuilder, InMemDicomObject};
use radsim_core::{RadSimError, Result};
use uuid::Uuid;

use crate::receiver::StoreNotification;

/// DICOM文件前导区长度
const PREAMBLE_LEN: usize = 128;

/// 空白CT图像的边长（像素）
const SYNTHETIC_SIZE: u16 = 512;

/// 写入实例的患者与检查标识
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceIdentity {
    pub patient_name: String,
    pub patient_id: String,
    pub accession_number: String,
    pub study_instance_uid: String,
}

/// 可发送实例的关键标识
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSummary {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub notification: StoreNotification,
}

/// 解析一个DICOM Part 10 文件（带或不带128字节前导区）
///
/// 缺少 SOPClassUID 或 SOPInstanceUID 的实例无法通过 C-STORE 发送，按校验错误处理。
pub fn inspect_instance(data: &[u8]) -> Result<InstanceSummary> {
    let object = read_part10(data)?;

    let sop_class_uid = string_element(&object, tags::SOP_CLASS_UID)
        .ok_or_else(|| RadSimError::Validation("缺少 SOPClassUID".to_string()))?;
    let sop_instance_uid = string_element(&object, tags::SOP_INSTANCE_UID)
        .ok_or_else(|| RadSimError::Validation("缺少 SOPInstanceUID".to_string()))?;

    Ok(InstanceSummary {
        sop_class_uid,
        sop_instance_uid,
        notification: notification_from_dataset(&object),
    })
}

/// 把实例改写到指定患者和检查名下
///
/// 覆盖 PatientName、PatientID、AccessionNumber、StudyID 和 StudyInstanceUID，
/// 缺少 Modality 时补为 CT。其余内容（像素数据、序列、SOP标识）保持不变。
pub fn retag_instance(data: &[u8], identity: &InstanceIdentity) -> Result<Vec<u8>> {
    let mut object = read_part10(data)?;
    object.put(DataElement::new(
        tags::PATIENT_NAME,
        VR::PN,
        PrimitiveValue::from(identity.patient_name.as_str()),
    ));
    object.put(DataElement::new(
        tags::PATIENT_ID,
        VR::LO,
        PrimitiveValue::from(identity.patient_id.as_str()),
    ));
    object.put(DataElement::new(
        tags::ACCESSION_NUMBER,
        VR::SH,
        PrimitiveValue::from(identity.accession_number.as_str()),
    ));
    object.put(DataElement::new(
        tags::STUDY_ID,
        VR::SH,
        PrimitiveValue::from(identity.accession_number.as_str()),
    ));
    object.put(DataElement::new(
        tags::STUDY_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(identity.study_instance_uid.as_str()),
    ));
    if string_element(&object, tags::MODALITY).is_none() {
        object.put(DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")));
    }
    encode(&object)
}

/// 生成一张空白的CT图像（512×512，16位，全黑）
///
/// 用于没有上传文件的“模拟扫描”，检查UID由调用方按检查号推导，
/// 这样归档中的检查能和工作列表条目对应上。
pub fn synthetic_ct_instance(identity: &InstanceIdentity) -> Result<Vec<u8>> {
    let sop_instance_uid = generate_uid();
    let pixels = usize::from(SYNTHETIC_SIZE) * usize::from(SYNTHETIC_SIZE);

    let object = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::CT_IMAGE_STORAGE)),
        DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(sop_instance_uid.as_str()),
        ),
        DataElement::new(
            tags::PATIENT_NAME,
            VR::PN,
            PrimitiveValue::from(identity.patient_name.as_str()),
        ),
        DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            PrimitiveValue::from(identity.patient_id.as_str()),
        ),
        DataElement::new(
            tags::ACCESSION_NUMBER,
            VR::SH,
            PrimitiveValue::from(identity.accession_number.as_str()),
        ),
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
        DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(identity.study_instance_uid.as_str()),
        ),
        DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(generate_uid()),
        ),
        DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
        DataElement::new(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("MONOCHROME2"),
        ),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(SYNTHETIC_SIZE)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(SYNTHETIC_SIZE)),
        DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(12_u16)),
        DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(11_u16)),
        DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
        DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(vec![0_u16; pixels].into())),
    ])
    .with_meta(
        FileMetaTableBuilder::new()
            .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid(sop_instance_uid.as_str()),
    )
    .map_err(|e| RadSimError::Internal(format!("无法生成DICOM文件头: {}", e)))?;

    encode(&object)
}

/// 生成 `2.25.` 形式的UID（UUID的十进制表示）
pub fn generate_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// 从 C-STORE 收到的数据集中提取通知字段；缺失或无法转换的元素视为缺失
pub fn notification_from_dataset(dataset: &InMemDicomObject) -> StoreNotification {
    StoreNotification {
        patient_name: string_element(dataset, tags::PATIENT_NAME),
        patient_id: string_element(dataset, tags::PATIENT_ID),
        study_instance_uid: string_element(dataset, tags::STUDY_INSTANCE_UID),
        modality: string_element(dataset, tags::MODALITY),
    }
}

/// 读取Part 10字节（带或不带128字节前导区）
fn read_part10(data: &[u8]) -> Result<DefaultDicomObject> {
    let body = match data.get(PREAMBLE_LEN..PREAMBLE_LEN + 4) {
        Some(magic) if magic == b"DICM" => &data[PREAMBLE_LEN..],
        _ => data,
    };
    dicom::object::from_reader(body)
        .map_err(|e| RadSimError::Validation(format!("不是有效的DICOM文件: {}", e)))
}

fn encode(object: &DefaultDicomObject) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    object
        .write_all(&mut data)
        .map_err(|e| RadSimError::Internal(format!("DICOM编码失败: {}", e)))?;
    Ok(data)
}

fn string_element(dataset: &InMemDicomObject, tag: Tag) -> Option<String> {
    let element = dataset.element(tag).ok()?;
    let value = element.to_str().ok()?;
    let value = value.trim_end_matches('\0').trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part10(elements: Vec<DataElement<InMemDicomObject>>) -> Vec<u8> {
        let object = InMemDicomObject::from_element_iter(elements)
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::SECONDARY_CAPTURE_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid("1.2.3.4.5"),
            )
            .unwrap();
        let mut data = Vec::new();
        object.write_all(&mut data).unwrap();
        data
    }

    #[test]
    fn test_inspect_valid_instance() {
        let data = part10(vec![
            DataElement::new(
                tags::SOP_CLASS_UID,
                VR::UI,
                PrimitiveValue::from(uids::SECONDARY_CAPTURE_IMAGE_STORAGE),
            ),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4.5")),
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("SUS-AAAA-1")),
        ]);

        let summary = inspect_instance(&data).unwrap();
        assert_eq!(summary.sop_instance_uid, "1.2.3.4.5");
        assert_eq!(summary.notification.patient_id.as_deref(), Some("SUS-AAAA-1"));
    }

    #[test]
    fn test_inspect_rejects_incomplete_or_garbage() {
        let data = part10(vec![DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            PrimitiveValue::from("SUS-AAAA-1"),
        )]);
        assert!(matches!(inspect_instance(&data), Err(RadSimError::Validation(_))));
        assert!(matches!(inspect_instance(b"not dicom"), Err(RadSimError::Validation(_))));
    }

    #[test]
    fn test_extracts_known_tags() {
        let dataset: InMemDicomObject = InMemDicomObject::from_element_iter([
            DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("DOE^JOHN")),
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("SUS-AAAA-1 ")),
            DataElement::new(
                tags::STUDY_INSTANCE_UID,
                VR::UI,
                PrimitiveValue::from("1.2.826.0.1.3680043.2.42\0"),
            ),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("MR")),
        ]);

        let notification = notification_from_dataset(&dataset);
        assert_eq!(notification.patient_name.as_deref(), Some("DOE^JOHN"));
        assert_eq!(notification.patient_id.as_deref(), Some("SUS-AAAA-1"));
        assert_eq!(
            notification.study_instance_uid.as_deref(),
            Some("1.2.826.0.1.3680043.2.42")
        );
        assert_eq!(notification.modality.as_deref(), Some("MR"));
    }

    #[test]
    fn test_missing_tags_become_none() {
        let dataset: InMemDicomObject = InMemDicomObject::from_element_iter([DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            PrimitiveValue::from("SUS-AAAA-1"),
        )]);

        let notification = notification_from_dataset(&dataset);
        assert!(notification.patient_name.is_none());
        assert!(notification.modality.is_none());

        let record = notification.into_record(chrono::Utc::now());
        assert_eq!(record.modality, radsim_core::UNKNOWN_MODALITY);
        assert_eq!(record.patient_id, "SUS-AAAA-1");
    }

    fn identity() -> InstanceIdentity {
        InstanceIdentity {
            patient_name: "DOE^JANE".to_string(),
            patient_id: "SUS-AAAA-1".to_string(),
            accession_number: "SUS-AAAA-ACC1".to_string(),
            study_instance_uid: "1.2.826.0.1.3680043.2.1234567890".to_string(),
        }
    }

    #[test]
    fn test_retag_rewrites_identity() {
        let data = part10(vec![
            DataElement::new(
                tags::SOP_CLASS_UID,
                VR::UI,
                PrimitiveValue::from(uids::SECONDARY_CAPTURE_IMAGE_STORAGE),
            ),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4.5")),
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("SUS-BBBB-9")),
            DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("9.9.9")),
        ]);

        let retagged = retag_instance(&data, &identity()).unwrap();
        let summary = inspect_instance(&retagged).unwrap();
        assert_eq!(summary.sop_instance_uid, "1.2.3.4.5");
        assert_eq!(summary.notification.patient_id.as_deref(), Some("SUS-AAAA-1"));
        assert_eq!(summary.notification.patient_name.as_deref(), Some("DOE^JANE"));
        assert_eq!(
            summary.notification.study_instance_uid.as_deref(),
            Some("1.2.826.0.1.3680043.2.1234567890")
        );
        assert_eq!(summary.notification.modality.as_deref(), Some("CT"));

        assert!(matches!(
            retag_instance(b"garbage", &identity()),
            Err(RadSimError::Validation(_))
        ));
    }

    #[test]
    fn test_synthetic_ct_instance() {
        let data = synthetic_ct_instance(&identity()).unwrap();
        let summary = inspect_instance(&data).unwrap();
        assert_eq!(summary.sop_class_uid, uids::CT_IMAGE_STORAGE);
        assert!(summary.sop_instance_uid.starts_with("2.25."));
        assert_eq!(summary.notification.patient_id.as_deref(), Some("SUS-AAAA-1"));
        assert_eq!(
            summary.notification.study_instance_uid.as_deref(),
            Some("1.2.826.0.1.3680043.2.1234567890")
        );

        // 每次生成新的实例UID
        let again = inspect_instance(&synthetic_ct_instance(&identity()).unwrap()).unwrap();
        assert_ne!(again.sop_instance_uid, summary.sop_instance_uid);
    }

    #[test]
    fn test_generated_uid_is_valid() {
        let uid = generate_uid();
        assert!(radsim_core::utils::is_valid_dicom_uid(&uid), "{}", uid);
    }
}
