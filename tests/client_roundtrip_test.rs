// 客户端端到端测试 - 启动真实监听端口，经 HTTP 客户端完成发送、补齐与对账
use std::sync::Arc;

use anyhow::Result;
use estate_messaging::client::{DeliveryState, MessagingHttpClient, Reconciler};
use estate_messaging::config::{DirectoryUserConfig, MessagingAppConfig};
use estate_messaging::interface::http::router;
use estate_messaging::service::wire::initialize_in_memory;
use estate_messaging::{ApplicationContext, ErrorCode};
use tokio::net::TcpListener;

async fn serve() -> Result<(String, Arc<ApplicationContext>)> {
    let _ = tracing_subscriber::fmt::try_init();
    let mut config = MessagingAppConfig::default();
    config.directory.users = ["buyer-1", "seller-1"]
        .into_iter()
        .map(|id| DirectoryUserConfig {
            id: id.into(),
            display_name: Some(id.to_uppercase()),
            avatar_url: None,
            can_buy: true,
            can_sell: true,
        })
        .collect();
    let context = Arc::new(initialize_in_memory(&config));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(context.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), context))
}

#[tokio::test]
async fn optimistic_send_is_confirmed_by_the_server() -> Result<()> {
    let (base_url, context) = serve().await?;
    let buyer = MessagingHttpClient::new(&base_url, context.authenticator.issue("buyer-1", 600)?)?;

    let resolved = buyer.resolve_thread("buyer-1", "seller-1", None).await?;
    assert!(resolved.created);
    let thread_id = resolved.thread_id;

    let mut reconciler = Reconciler::new("buyer-1");
    let outgoing = reconciler.begin_send(&thread_id, "Is this available?");
    assert_eq!(reconciler.pending_count(&thread_id), 1);

    let stored = buyer
        .send_message(&thread_id, &outgoing.content, Some(&outgoing.client_msg_id))
        .await?;
    assert_eq!(stored.client_msg_id.as_deref(), Some(outgoing.client_msg_id.as_str()));
    assert!(reconciler.confirm(&stored));
    assert_eq!(reconciler.pending_count(&thread_id), 0);

    // 同一个 clientMsgId 重试得到同一条消息
    let retried = buyer
        .send_message(&thread_id, &outgoing.content, Some(&outgoing.client_msg_id))
        .await?;
    assert_eq!(retried.id, stored.id);
    assert!(!reconciler.confirm(&retried));

    let local = reconciler.messages(&thread_id);
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].state, DeliveryState::Confirmed);
    Ok(())
}

#[tokio::test]
async fn reconnecting_client_catches_up_from_history() -> Result<()> {
    let (base_url, context) = serve().await?;
    let buyer = MessagingHttpClient::new(&base_url, context.authenticator.issue("buyer-1", 600)?)?;
    let seller = MessagingHttpClient::new(&base_url, context.authenticator.issue("seller-1", 600)?)?;

    let thread_id = buyer
        .resolve_thread("buyer-1", "seller-1", None)
        .await?
        .thread_id;
    buyer.send_message(&thread_id, "first", None).await?;

    let mut seller_view = Reconciler::new("seller-1");
    assert_eq!(seller.resync_thread(&mut seller_view, &thread_id).await?, 1);
    assert_eq!(seller_view.last_confirmed_seq(&thread_id), Some(1));

    // 离线期间的新消息通过轮询补齐
    buyer.send_message(&thread_id, "second", None).await?;
    buyer.send_message(&thread_id, "third", None).await?;
    assert_eq!(seller.poll_thread(&mut seller_view, &thread_id).await?, 2);
    assert_eq!(seller_view.last_confirmed_seq(&thread_id), Some(3));

    let summaries = seller.list_threads(None).await?;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].unread_count, 3);
    assert_eq!(summaries[0].counterpart_name.as_deref(), Some("BUYER-1"));

    let receipt = seller.mark_read(&thread_id).await?;
    assert_eq!(receipt.cleared, 3);
    assert_eq!(seller.get_thread(&thread_id).await?.seller_unread_count, 0);
    Ok(())
}

#[tokio::test]
async fn api_errors_are_decoded() -> Result<()> {
    let (base_url, context) = serve().await?;
    let buyer = MessagingHttpClient::new(&base_url, context.authenticator.issue("buyer-1", 600)?)?;

    let err = buyer.get_thread("no-such-thread").await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ThreadNotFound));
    assert!(!err.is_retryable());

    let anonymous = MessagingHttpClient::new(&base_url, "garbage")?;
    let err = anonymous.list_threads(None).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Unauthenticated));
    Ok(())
}
