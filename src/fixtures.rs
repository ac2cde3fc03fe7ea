//! Datos simulados del appliance. Se construyen una sola vez al arrancar y se
//! comparten en sólo lectura (`Arc<MockStore>`).

use crate::models::{
    AIModel, Agent, AuditLog, AuditStatus, BadCase, CaseStatus, ChunkStatus, EnhancedFile,
    FileStatus, FileType, IssueType, KnowledgeChunk, MetricCard, MetricGroup, ModelKind,
    ModelStatus, PermissionLevel, RiskLevel, SecurityStat, SystemUser, UserRole, UserStatus,
};

/// Contexto "recuperado" que se envía al LLM en cada turno del chat.
pub const MOCK_KNOWLEDGE_BASE: &str = "
《集团差旅管理规范 2024版》
1. 住宿标准：一线城市（北上广深）标准为 800元/晚，二线城市 500元/晚。
2. 交通工具：高铁二等座，飞行时长超过4小时可申请公务舱。
3. 餐饮补贴：无需发票，每日固定发放 120元。
4. 审批流：部门经理审批 -> 财务复核。
";

pub const PRESET_QUESTIONS: [&str; 3] = [
    "最新的差旅住宿标准是多少？",
    "如何申请报销餐饮费？",
    "查询差旅审批流程",
];

/// Almacén en memoria con todos los registros del demo.
#[derive(Debug, Clone)]
pub struct MockStore {
    pub agents: Vec<Agent>,
    pub files: Vec<EnhancedFile>,
    pub chunks: Vec<KnowledgeChunk>,
    pub bad_cases: Vec<BadCase>,
    pub audit_logs: Vec<AuditLog>,
    pub security_stats: Vec<SecurityStat>,
    pub users: Vec<SystemUser>,
    pub models: Vec<AIModel>,
    pub metrics: Vec<MetricCard>,
}

impl MockStore {
    pub fn seed() -> Self {
        let chunks = seed_chunks();
        let bad_cases = seed_bad_cases(&chunks);
        Self {
            agents: seed_agents(),
            files: seed_files(),
            chunks,
            bad_cases,
            audit_logs: seed_audit_logs(),
            security_stats: seed_security_stats(),
            users: seed_users(),
            models: seed_models(),
            metrics: seed_metrics(),
        }
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn file(&self, id: &str) -> Option<&EnhancedFile> {
        self.files.iter().find(|f| f.id == id)
    }

    /// Chunks de un fichero. El demo comparte el mismo juego de chunks para
    /// todos los documentos existentes.
    pub fn chunks_for(&self, file_id: &str) -> &[KnowledgeChunk] {
        if self.file(file_id).is_some() {
            &self.chunks
        } else {
            &[]
        }
    }

    pub fn bad_case(&self, id: &str) -> Option<&BadCase> {
        self.bad_cases.iter().find(|c| c.id == id)
    }

    pub fn audit_log(&self, id: &str) -> Option<&AuditLog> {
        self.audit_logs.iter().find(|l| l.id == id)
    }

    pub fn security_stat(&self, risk_type: &str) -> Option<&SecurityStat> {
        self.security_stats.iter().find(|s| s.risk_type == risk_type)
    }

    pub fn metric(&self, id: &str) -> Option<&MetricCard> {
        self.metrics.iter().find(|m| m.id == id)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn seed_agents() -> Vec<Agent> {
    let agent = |id: &str, name: &str, category: &str, description: &str, icon: &str, stats: &str, is_hot: bool| Agent {
        id: id.into(),
        name: name.into(),
        category: category.into(),
        description: description.into(),
        icon: icon.into(),
        stats: stats.into(),
        is_hot,
    };
    vec![
        agent("a1", "法务合规助手", "法务", "自动比对历史合同，识别风险条款", "Scale", "2.3k 次调用", true),
        agent("a2", "销售标书生成", "销售", "基于过往案例一键生成技术标书", "FileCheck", "890 次调用", false),
        agent("a3", "IT 运维大脑", "运维", "诊断服务器日志，给出修复建议", "Server", "3.1k 次调用", false),
    ]
}

fn seed_files() -> Vec<EnhancedFile> {
    #[allow(clippy::too_many_arguments)]
    fn file(
        id: &str,
        name: &str,
        file_type: FileType,
        size: &str,
        uploaded_at: &str,
        status: FileStatus,
        department: &str,
        hits: u32,
        quality: u8,
        permission_level: PermissionLevel,
        owner: &str,
        tags: &[&str],
    ) -> EnhancedFile {
        EnhancedFile {
            id: id.into(),
            name: name.into(),
            file_type,
            size: size.into(),
            uploaded_at: uploaded_at.into(),
            status,
            department: department.into(),
            hits,
            quality,
            permission_level,
            owner: owner.into(),
            tags: strings(tags),
        }
    }

    vec![
        file("1", "公司制度规范汇编_2025.pdf", FileType::Pdf, "24 MB", "2025-01-10", FileStatus::Published, "人力资源部", 1250, 98, PermissionLevel::Public, "HR_Admin", &["制度", "行政"]),
        file("2", "2025_Q1_薪资调整方案.xlsx", FileType::Xlsx, "2 MB", "2025-02-01", FileStatus::Published, "人力资源部", 12, 100, PermissionLevel::Confidential, "HR_Director", &["薪资", "绝密"]),
        file("3", "核心业务系统源码架构图.pptx", FileType::Pptx, "150 MB", "2025-01-15", FileStatus::Auditing, "研发部", 0, 85, PermissionLevel::Department, "Dev_Lead", &["架构", "技术"]),
        file("4", "Q4季度竞品分析报告.pdf", FileType::Pdf, "55 MB", "2025-01-12", FileStatus::Published, "市场部", 890, 95, PermissionLevel::Department, "Marketing_VP", &["竞品", "市场"]),
        file("5", "2024年度财务审计底稿.docx", FileType::Docx, "12 MB", "2025-01-14", FileStatus::Parsing, "财务部", 0, 0, PermissionLevel::Confidential, "Finance_Audit", &["审计"]),
    ]
}

fn seed_chunks() -> Vec<KnowledgeChunk> {
    let chunk = |id: &str, content: &str, token_count: u32, vector_id: &str, similarity: f32, status: ChunkStatus| KnowledgeChunk {
        id: id.into(),
        content: content.into(),
        token_count,
        vector_id: vector_id.into(),
        similarity: Some(similarity),
        status,
    };
    vec![
        chunk("c1", "第一章 总则：本制度旨在规范公司差旅管理，适用于全体正式员工。差旅活动应遵循节约、高效的原则。", 256, "vec_001", 0.92, ChunkStatus::Active),
        chunk("c2", "第二章 住宿标准：一线城市（北上广深）标准为 800元/晚，二线城市 500元/晚。超标部分需由个人承担或经VP级特批。", 128, "vec_002", 0.88, ChunkStatus::Active),
        chunk("c3", "表1-1 城市等级划分表：[表格数据：包含300个城市的分级列表]...", 512, "vec_003", 0.45, ChunkStatus::Disabled),
    ]
}

fn seed_bad_cases(chunks: &[KnowledgeChunk]) -> Vec<BadCase> {
    vec![
        BadCase {
            id: "bc1".into(),
            query: "如何报销上个月的团建费用？".into(),
            user: "张三".into(),
            time: "10:00".into(),
            issue_type: IssueType::ZeroResult,
            related_doc: None,
            status: CaseStatus::Pending,
            ai_response: Some("抱歉，我在知识库中未找到关于“团建费用报销”的具体规定。我只能回答差旅费用的相关问题。".into()),
            retrieved_chunks: Vec::new(),
        },
        BadCase {
            id: "bc2".into(),
            query: "年假可以预支吗？".into(),
            user: "李四".into(),
            time: "11:20".into(),
            issue_type: IssueType::LowScore,
            related_doc: Some("考勤管理制度.pdf".into()),
            status: CaseStatus::Resolved,
            ai_response: Some("根据规定，年假一般不支持预支。".into()),
            retrieved_chunks: chunks.iter().take(1).cloned().collect(),
        },
    ]
}

fn seed_audit_logs() -> Vec<AuditLog> {
    let log = |id: &str, time: &str, user: &str, action: &str, detail: &str, status: AuditStatus, risk: RiskLevel, ip: &str, payload: Option<&str>| AuditLog {
        id: id.into(),
        time: time.into(),
        user: user.into(),
        action: action.into(),
        detail: detail.into(),
        status,
        risk_level: Some(risk),
        ip: Some(ip.into()),
        payload: payload.map(str::to_string),
    };
    vec![
        log("L001", "10:23:45", "系统自动", "敏感词过滤", "拦截包含身份证号的Prompt", AuditStatus::Blocked, RiskLevel::High, "192.168.1.5", Some(r#"{"prompt": "User ID: 1101011990..."}"#)),
        log("L002", "10:21:12", "张三 (销售部)", "知识调用", "引用《产品定价表_V3》", AuditStatus::Allowed, RiskLevel::Low, "192.168.1.102", None),
        log("L003", "10:15:30", "李四 (研发部)", "文档解析", "API接口文档.md - 解析成功", AuditStatus::Allowed, RiskLevel::Low, "192.168.1.105", None),
        log("L004", "09:45:10", "外部IP", "SQL注入尝试", "拦截恶意 Payload", AuditStatus::Blocked, RiskLevel::High, "202.106.0.21", Some("SELECT * FROM users WHERE 1=1")),
        log("L005", "09:30:22", "王五 (人事部)", "越权访问", "尝试访问《高管薪资》被拒", AuditStatus::Blocked, RiskLevel::Medium, "192.168.1.20", Some("GET /api/docs/salary_vp_2024.pdf")),
    ]
}

fn seed_security_stats() -> Vec<SecurityStat> {
    [
        ("PII 敏感信息", 1240, 45),
        ("Prompt 注入", 850, 30),
        ("越权访问", 420, 15),
        ("其他违规", 280, 10),
    ]
    .into_iter()
    .map(|(risk_type, count, percentage)| SecurityStat {
        risk_type: risk_type.into(),
        count,
        percentage,
    })
    .collect()
}

fn seed_users() -> Vec<SystemUser> {
    [
        ("u1", "Admin_Sys", UserRole::Admin, "IT部", "2025-02-20 10:00", UserStatus::Active),
        ("u2", "Knowledge_Lead", UserRole::Editor, "运营部", "2025-02-19 14:30", UserStatus::Active),
        ("u3", "HR_Director", UserRole::Viewer, "人力资源部", "2025-02-18 09:15", UserStatus::Active),
        ("u4", "Temp_User", UserRole::Viewer, "实习生", "2025-01-10 10:00", UserStatus::Locked),
    ]
    .into_iter()
    .map(|(id, name, role, department, last_login, status)| SystemUser {
        id: id.into(),
        name: name.into(),
        role,
        department: department.into(),
        last_login: last_login.into(),
        status,
    })
    .collect()
}

fn seed_models() -> Vec<AIModel> {
    #[allow(clippy::too_many_arguments)]
    fn model(
        id: &str,
        name: &str,
        version: &str,
        kind: ModelKind,
        parameters: &str,
        context_window: &str,
        vram_usage: u32,
        status: ModelStatus,
        description: &str,
        tags: &[&str],
    ) -> AIModel {
        AIModel {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            kind,
            parameters: parameters.into(),
            context_window: context_window.into(),
            vram_usage,
            status,
            description: description.into(),
            tags: strings(tags),
        }
    }

    vec![
        model("m1", "DeepSeek-R1-Distill-70B", "v1.2", ModelKind::Llm, "70B", "128k", 48, ModelStatus::Loaded, "深度求索最新蒸馏模型，推理能力强，适合复杂逻辑任务。", &["Reasoning", "Math", "Code"]),
        model("m2", "Qwen-2.5-72B-Instruct", "v2.5", ModelKind::Llm, "72B", "32k", 52, ModelStatus::Unloaded, "阿里通义千问，通用能力均衡，中文指令遵循能力卓越。", &["General", "Chat", "Roleplay"]),
        model("m3", "BGE-M3-Embedding", "v1.0", ModelKind::Embedding, "300M", "8k", 2, ModelStatus::Loaded, "智源多语言向量模型，支持稠密/稀疏/多向量检索。", &["RAG", "Search"]),
        model("m4", "Llama-3-70B-Quant", "v3.0", ModelKind::Llm, "70B", "8k", 35, ModelStatus::Unloaded, "Meta 开源模型基座，4-bit 量化版本，适配性极佳。", &["English", "General"]),
        model("m5", "BCE-Reranker-Base", "v2.0", ModelKind::Rerank, "500M", "4k", 4, ModelStatus::Loaded, "网易有道重排序模型，大幅提升 RAG Top-1 准确率。", &["RAG", "Rerank"]),
    ]
}

fn seed_metrics() -> Vec<MetricCard> {
    let metric = |id: &str, group: MetricGroup, label: &str, value: &str, unit: &str, change: &str, trend_up: bool, desc: Option<&str>, has_drill_down: bool| MetricCard {
        id: id.into(),
        group,
        label: label.into(),
        value: value.into(),
        unit: unit.into(),
        change: change.into(),
        trend_up,
        desc: desc.map(str::to_string),
        has_drill_down,
    };
    vec![
        metric("total", MetricGroup::Assets, "知识碎片总量", "1,240,592", "个", "+12%", true, None, false),
        metric("storage", MetricGroup::Assets, "向量存储占用", "1.8", "TB", "+50GB", true, None, false),
        metric("parsingRate", MetricGroup::Assets, "解析成功率", "99.8%", "", "+0.2%", true, None, true),
        metric("aging", MetricGroup::Assets, "知识老化率", "12%", "", "-2%", false, Some("6个月未更新文档"), true),
        metric("qps", MetricGroup::Usage, "平均 QPS", "450", "", "+15%", true, None, false),
        metric("latency", MetricGroup::Usage, "P99 检索耗时", "850", "ms", "-120ms", false, None, false),
        metric("zeroRate", MetricGroup::Usage, "零结果率", "3.2%", "", "-0.5%", false, Some("未命中知识的查询"), true),
        metric("satisfaction", MetricGroup::Usage, "用户点赞率", "94.5%", "", "+1.2%", true, None, true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_loads_every_collection() {
        let store = MockStore::seed();
        assert_eq!(store.files.len(), 5);
        assert_eq!(store.chunks.len(), 3);
        assert_eq!(store.bad_cases.len(), 2);
        assert_eq!(store.audit_logs.len(), 5);
        assert_eq!(store.models.len(), 5);
        assert_eq!(store.metrics.len(), 8);
    }

    #[test]
    fn loaded_models_start_under_capacity() {
        let store = MockStore::seed();
        let used: u32 = store
            .models
            .iter()
            .filter(|m| m.status == ModelStatus::Loaded)
            .map(|m| m.vram_usage)
            .sum();
        assert_eq!(used, 54);
    }

    #[test]
    fn chunks_only_exist_for_known_files() {
        let store = MockStore::seed();
        assert_eq!(store.chunks_for("1").len(), 3);
        assert!(store.chunks_for("nope").is_empty());
    }

    #[test]
    fn resolved_case_keeps_its_retrieved_chunk() {
        let store = MockStore::seed();
        let case = store.bad_case("bc2").unwrap();
        assert_eq!(case.retrieved_chunks.len(), 1);
        assert_eq!(case.retrieved_chunks[0].id, "c1");
    }
}
