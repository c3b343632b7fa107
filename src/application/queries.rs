/// 会话列表查询
#[derive(Debug, Clone)]
pub struct ListThreadsQuery {
    pub user_id: String,
    pub limit: Option<usize>,
}

/// 单个会话查询
#[derive(Debug, Clone)]
pub struct GetThreadQuery {
    pub thread_id: String,
    pub user_id: String,
}

/// 历史消息查询
#[derive(Debug, Clone)]
pub struct MessageHistoryQuery {
    pub thread_id: String,
    pub user_id: String,
    /// 只返回序号大于该值的消息
    pub after_seq: Option<i64>,
    pub limit: Option<usize>,
}
