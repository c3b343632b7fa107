/// 解析（或创建）会话命令
#[derive(Debug, Clone)]
pub struct ResolveThreadCommand {
    /// 发起调用的已认证用户
    pub caller_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub property_id: Option<String>,
}

/// 发送消息命令
#[derive(Debug, Clone)]
pub struct SendMessageCommand {
    pub thread_id: String,
    pub sender_id: String,
    pub content: String,
    pub client_msg_id: Option<String>,
}

/// 标记已读命令
#[derive(Debug, Clone)]
pub struct MarkReadCommand {
    pub thread_id: String,
    pub user_id: String,
}

/// 输入状态命令
#[derive(Debug, Clone)]
pub struct TypingCommand {
    pub thread_id: String,
    pub user_id: String,
    pub is_typing: bool,
}
