//! HL7接口模块
//!
//! 模拟器各子系统之间交换的 HL7 v2.3 文本消息：
//! - ADT^A04（KIS → RIS，患者登记）
//! - QRY^Q02（RIS → LIS，化验查询）
//! - ORU^R01（LIS → RIS 化验结果，工作站 → RIS 放射学报告）
//! - ORM^O01（RIS → 检查设备，检查申请）
//!
//! 段之间用 `\r` 分隔。解析器只用于回读和测试，不做完整的HL7校验。

use chrono::{DateTime, Utc};
use radsim_core::{RadSimError, UNKNOWN};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// HL7版本号
pub const HL7_VERSION: &str = "2.3";

const SEGMENT_TERMINATOR: char = '\r';

#[derive(Error, Debug)]
pub enum Hl7Error {
    #[error("Invalid HL7 message format: {0}")]
    InvalidFormat(String),
    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl From<Hl7Error> for RadSimError {
    fn from(e: Hl7Error) -> Self {
        RadSimError::Hl7(e.to_string())
    }
}

/// HL7消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hl7MessageType {
    ADT, // 患者管理
    ORM, // 检查申请
    ORU, // 观察结果
    QRY, // 查询
}

impl TryFrom<&str> for Hl7MessageType {
    type Error = Hl7Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "ADT" => Ok(Hl7MessageType::ADT),
            "ORM" => Ok(Hl7MessageType::ORM),
            "ORU" => Ok(Hl7MessageType::ORU),
            "QRY" => Ok(Hl7MessageType::QRY),
            _ => Err(Hl7Error::UnsupportedMessageType(value.to_string())),
        }
    }
}

/// HL7消息解析后的结构化数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hl7Message {
    pub message_type: Hl7MessageType,
    pub trigger_event: String,
    pub message_control_id: String,
    pub version_id: String,
    pub segments: Vec<Hl7Segment>,
}

impl Hl7Message {
    /// 第一个指定类型的段
    pub fn segment(&self, segment_type: &str) -> Option<&Hl7Segment> {
        self.segments.iter().find(|s| s.segment_type == segment_type)
    }

    /// 全部指定类型的段
    pub fn segments_of<'a>(&'a self, segment_type: &'a str) -> impl Iterator<Item = &'a Hl7Segment> {
        self.segments.iter().filter(move |s| s.segment_type == segment_type)
    }
}

/// HL7段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hl7Segment {
    pub segment_type: String,
    pub fields: Vec<String>, // 段名之后的原始字段
}

impl Hl7Segment {
    /// 按HL7编号取字段（从1开始）
    ///
    /// MSH段的 MSH-1 是字段分隔符本身，所以编号整体偏移一位。
    pub fn field(&self, number: usize) -> Option<&str> {
        let index = if self.segment_type == "MSH" {
            match number {
                0 => return None,
                1 => return Some("|"),
                n => n - 2,
            }
        } else {
            number.checked_sub(1)?
        };
        self.fields.get(index).map(String::as_str)
    }

    /// 字段中的第 `component` 个分量（从1开始）
    pub fn component(&self, number: usize, component: usize) -> Option<&str> {
        self.field(number)?.split('^').nth(component.checked_sub(1)?)
    }
}

/// HL7解析器
///
/// 公开的读回接口：把本模块生成的（或外部收到的）ER7文本还原为段和字段，
/// 供调用方按 HL7 编号读取 `MSH-9`、`PID-3` 之类的字段。
pub struct Hl7Parser {
    field_separator: char,
    component_separator: char,
}

impl Default for Hl7Parser {
    fn default() -> Self {
        Self {
            field_separator: '|',
            component_separator: '^',
        }
    }
}

impl Hl7Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析HL7消息（段分隔符接受 `\r`、`\n` 或 `\r\n`）
    pub fn parse(&self, message: &str) -> Result<Hl7Message, Hl7Error> {
        let segments: Vec<Hl7Segment> = message
            .split(['\r', '\n'])
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| self.parse_segment(line))
            .collect();

        let msh = segments
            .first()
            .filter(|s| s.segment_type == "MSH")
            .ok_or_else(|| Hl7Error::InvalidFormat("Message must start with MSH segment".to_string()))?;

        let raw_type = msh
            .field(9)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| Hl7Error::MissingField("Message Type (MSH-9)".to_string()))?;
        let mut type_parts = raw_type.split(self.component_separator);
        let message_type = Hl7MessageType::try_from(type_parts.next().unwrap_or_default())?;
        let trigger_event = type_parts.next().unwrap_or_default().to_string();

        let message_control_id = msh.field(10).unwrap_or_default().to_string();
        let version_id = msh.field(12).unwrap_or_default().to_string();

        debug!(?message_type, %trigger_event, %message_control_id, "parsed HL7 message");

        Ok(Hl7Message {
            message_type,
            trigger_event,
            message_control_id,
            version_id,
            segments,
        })
    }

    fn parse_segment(&self, line: &str) -> Hl7Segment {
        let mut parts = line.split(self.field_separator);
        let segment_type = parts.next().unwrap_or_default().to_string();
        Hl7Segment {
            segment_type,
            fields: parts.map(str::to_string).collect(),
        }
    }
}

/// HL7时间戳 `YYYYMMDDHHMMSS`
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// 消息控制ID：前缀加六位随机数
pub fn message_control_id(prefix: &str) -> String {
    let n: u32 = rand::thread_rng().gen_range(100_000..=999_999);
    format!("{}{}", prefix, n)
}

/// 把任意文本变成单行、不含分隔符的字段值
pub fn sanitize_field(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
        .trim()
        .replace('|', "/")
        .replace('~', "-")
        .replace('\\', "/")
}

struct MessageHeader<'a> {
    sending_application: &'a str,
    sending_facility: &'a str,
    receiving_application: &'a str,
    receiving_facility: &'a str,
    message_type: &'a str,
    control_id: &'a str,
    timestamp: &'a str,
}

impl MessageHeader<'_> {
    fn render(&self) -> String {
        format!(
            "MSH|^~\\&|{}|{}|{}|{}|{}||{}|{}|P|{}",
            self.sending_application,
            self.sending_facility,
            self.receiving_application,
            self.receiving_facility,
            self.timestamp,
            self.message_type,
            self.control_id,
            HL7_VERSION
        )
    }
}

fn join_segments(segments: &[String]) -> String {
    let mut message = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            message.push(SEGMENT_TERMINATOR);
        }
        message.push_str(segment);
    }
    message
}

fn pid_or_unknown(pid: &str) -> String {
    let pid = sanitize_field(pid);
    if pid.is_empty() {
        UNKNOWN.to_string()
    } else {
        pid
    }
}

fn name_or_placeholder(name: &str) -> String {
    let name = sanitize_field(name);
    if name.is_empty() {
        "^".to_string()
    } else {
        name
    }
}

/// 患者登记 ADT^A04（KIS → RIS）
pub fn build_adt_a04(pid: &str, name: &str, at: DateTime<Utc>) -> String {
    let ts = timestamp(at);
    let control_id = message_control_id("ADT");
    let header = MessageHeader {
        sending_application: "KIS",
        sending_facility: "HOSP",
        receiving_application: "RIS",
        receiving_facility: "RADIO",
        message_type: "ADT^A04",
        control_id: &control_id,
        timestamp: &ts,
    };
    join_segments(&[
        header.render(),
        format!("EVN|A04|{}", ts),
        format!("PID|1||{}||{}", pid_or_unknown(pid), name_or_placeholder(name)),
        "PV1|1|O".to_string(),
    ])
}

/// 肌酐化验查询 QRY^Q02（RIS → LIS）
pub fn build_qry_q02(pid: &str, at: DateTime<Utc>) -> String {
    let ts = timestamp(at);
    let control_id = message_control_id("QRY");
    let pid = pid_or_unknown(pid);
    let header = MessageHeader {
        sending_application: "RIS",
        sending_facility: "RADIO",
        receiving_application: "LIS",
        receiving_facility: "LAB",
        message_type: "QRY^Q02",
        control_id: &control_id,
        timestamp: &ts,
    };
    join_segments(&[
        header.render(),
        format!("PID|1||{}||^", pid),
        format!("QRD|{}|R|I|{}|||1^RD|{}|RES", ts, control_id, pid),
        "QRF|MON|||||RCT^Creatinine".to_string(),
    ])
}

/// 一条数值型化验结果
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<'a> {
    pub code: &'a str,            // 如 KREA
    pub name: &'a str,            // 如 Creatinine
    pub value: f64,
    pub unit: &'a str,
    pub reference_range: &'a str, // 如 0.6-1.2
    pub flag: &'a str,            // NORMAL / CRITICAL
}

/// 化验结果 ORU^R01（LIS → RIS）
pub fn build_oru_lab_result(pid: &str, observation: &Observation<'_>, at: DateTime<Utc>) -> String {
    let ts = timestamp(at);
    let control_id = message_control_id("ORU");
    let header = MessageHeader {
        sending_application: "LIS",
        sending_facility: "LAB",
        receiving_application: "RIS",
        receiving_facility: "RADIO",
        message_type: "ORU^R01",
        control_id: &control_id,
        timestamp: &ts,
    };
    join_segments(&[
        header.render(),
        format!("PID|||{}||^", pid_or_unknown(pid)),
        format!("OBR|1|||{}^{}", observation.code, observation.name),
        format!(
            "OBX|1|NM|{}||{}|{}|{}|{}|||F",
            observation.code,
            observation.value,
            observation.unit,
            observation.reference_range,
            sanitize_field(observation.flag)
        ),
    ])
}

/// 检查申请 ORM^O01（RIS → 检查设备）
pub fn build_orm_o01(
    pid: &str,
    name: &str,
    accession_number: &str,
    description: &str,
    at: DateTime<Utc>,
) -> String {
    let ts = timestamp(at);
    let control_id = message_control_id("ORM");
    let accession_number = sanitize_field(accession_number);
    let header = MessageHeader {
        sending_application: "RIS",
        sending_facility: "RADIO",
        receiving_application: "MODALITY",
        receiving_facility: "RADIO",
        message_type: "ORM^O01",
        control_id: &control_id,
        timestamp: &ts,
    };
    join_segments(&[
        header.render(),
        format!("PID|1||{}||{}", pid_or_unknown(pid), name_or_placeholder(name)),
        format!("ORC|NW|{}|||SC||||{}", accession_number, ts),
        format!(
            "OBR|1|{}||^{}|||{}",
            accession_number,
            sanitize_field(description),
            ts
        ),
    ])
}

/// 放射学报告 ORU^R01（工作站 → RIS）；空文本用占位文本代替
pub fn build_oru_report(
    pid: &str,
    patient_name: &str,
    study_instance_uid: &str,
    report_text: &str,
    at: DateTime<Utc>,
) -> String {
    let ts = timestamp(at);
    let control_id = message_control_id("ORU");
    let mut text = sanitize_field(report_text);
    if text.is_empty() {
        text = "No report text.".to_string();
    }
    let header = MessageHeader {
        sending_application: "WORKSTATION",
        sending_facility: "RAD",
        receiving_application: "RIS",
        receiving_facility: "RADIO",
        message_type: "ORU^R01",
        control_id: &control_id,
        timestamp: &ts,
    };
    join_segments(&[
        header.render(),
        format!("PID|1||{}||{}", pid_or_unknown(pid), name_or_placeholder(patient_name)),
        "OBR|1|||RPT^Radiology Report".to_string(),
        format!("OBX|1|TX|RPT||{}|||||F", text),
        format!("OBX|2|ST|STUDYUID||{}|||||F", sanitize_field(study_instance_uid)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    #[test]
    fn test_sanitize_field() {
        assert_eq!(sanitize_field(" a|b~c\\d\r\ne "), "a/b-c/d  e");
        assert_eq!(sanitize_field("   "), "");
    }

    #[test]
    fn test_control_id_shape() {
        let id = message_control_id("ADT");
        assert!(id.starts_with("ADT"));
        assert_eq!(id.len(), 9);
        assert!(id[3..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_adt_a04_round_trip() {
        let raw = build_adt_a04("SUS-AAAA-1", "DOE^JOHN", at());
        let message = Hl7Parser::new().parse(&raw).unwrap();

        assert_eq!(message.message_type, Hl7MessageType::ADT);
        assert_eq!(message.trigger_event, "A04");
        assert_eq!(message.version_id, HL7_VERSION);
        assert!(message.message_control_id.starts_with("ADT"));

        let msh = message.segment("MSH").unwrap();
        assert_eq!(msh.field(1), Some("|"));
        assert_eq!(msh.field(3), Some("KIS"));
        assert_eq!(msh.field(7), Some("20240305140709"));

        let pid = message.segment("PID").unwrap();
        assert_eq!(pid.field(3), Some("SUS-AAAA-1"));
        assert_eq!(pid.component(5, 1), Some("DOE"));
        assert_eq!(pid.component(5, 2), Some("JOHN"));
        assert_eq!(message.segment("EVN").unwrap().field(1), Some("A04"));
    }

    #[test]
    fn test_qry_q02_references_pid() {
        let raw = build_qry_q02("SUS-AAAA-1", at());
        let message = Hl7Parser::new().parse(&raw).unwrap();
        assert_eq!(message.message_type, Hl7MessageType::QRY);
        let qrd = message.segment("QRD").unwrap();
        assert_eq!(qrd.field(4), Some(message.message_control_id.as_str()));
        assert_eq!(qrd.field(8), Some("SUS-AAAA-1"));
    }

    #[test]
    fn test_oru_lab_result_observation() {
        let observation = Observation {
            code: "KREA",
            name: "Creatinine",
            value: 1.42,
            unit: "mg/dL",
            reference_range: "0.6-1.2",
            flag: "CRITICAL",
        };
        let raw = build_oru_lab_result("SUS-AAAA-1", &observation, at());
        let message = Hl7Parser::new().parse(&raw).unwrap();
        let obx = message.segment("OBX").unwrap();
        assert_eq!(obx.field(5), Some("1.42"));
        assert_eq!(obx.field(6), Some("mg/dL"));
        assert_eq!(obx.field(8), Some("CRITICAL"));
    }

    #[test]
    fn test_orm_o01_carries_accession() {
        let raw = build_orm_o01("SUS-AAAA-1", "DOE^JOHN", "SUS-AAAA-ACC1", "CT Thorax", at());
        let message = Hl7Parser::new().parse(&raw).unwrap();
        assert_eq!(message.message_type, Hl7MessageType::ORM);
        assert_eq!(message.segment("ORC").unwrap().field(2), Some("SUS-AAAA-ACC1"));
        assert_eq!(message.segment("OBR").unwrap().component(4, 2), Some("CT Thorax"));
    }

    #[test]
    fn test_report_placeholder_and_study_uid() {
        let raw = build_oru_report("SUS-AAAA-1", "", "1.2.3", "  ", at());
        let message = Hl7Parser::new().parse(&raw).unwrap();
        let observations: Vec<_> = message.segments_of("OBX").collect();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].field(5), Some("No report text."));
        assert_eq!(observations[1].field(5), Some("1.2.3"));
        assert_eq!(message.segment("PID").unwrap().field(5), Some("^"));
    }

    #[test]
    fn test_report_text_cannot_inject_segments() {
        let raw = build_oru_report("SUS-AAAA-1", "DOE", "1.2.3", "line1\rOBX|9|TX", at());
        let message = Hl7Parser::new().parse(&raw).unwrap();
        assert_eq!(message.segments_of("OBX").count(), 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let parser = Hl7Parser::new();
        assert!(matches!(parser.parse(""), Err(Hl7Error::InvalidFormat(_))));
        assert!(matches!(parser.parse("PID|1||X"), Err(Hl7Error::InvalidFormat(_))));
        assert!(matches!(
            parser.parse("MSH|^~\\&|A|B|C|D|20240101||XYZ^1|1|P|2.3"),
            Err(Hl7Error::UnsupportedMessageType(_))
        ));
        assert!(matches!(
            parser.parse("MSH|^~\\&|A|B|C|D|20240101"),
            Err(Hl7Error::MissingField(_))
        ));
    }

    #[test]
    fn test_patient_id_cannot_break_segments() {
        let message = build_adt_a04("SUS-AAAA-1|X\rEVIL|Y", "DOE^JANE", at());
        let parsed = Hl7Parser::new().parse(&message).unwrap();
        assert_eq!(parsed.segments.len(), 4);
        let pid = parsed.segment("PID").unwrap();
        assert_eq!(pid.field(3), Some("SUS-AAAA-1/X EVIL/Y"));
        assert_eq!(pid.field(5), Some("DOE^JANE"));

        let query = build_qry_q02("A|B", at());
        let parsed = Hl7Parser::new().parse(&query).unwrap();
        assert_eq!(parsed.segment("PID").unwrap().field(3), Some("A/B"));
    }
}
