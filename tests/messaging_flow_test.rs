// 集成测试套件 - 以内存存储驱动完整的会话、消息与扇出流程
use std::collections::HashSet;
use std::sync::Arc;

use estate_messaging::application::commands::{
    MarkReadCommand, ResolveThreadCommand, SendMessageCommand, TypingCommand,
};
use estate_messaging::application::queries::{
    GetThreadQuery, ListThreadsQuery, MessageHistoryQuery,
};
use estate_messaging::config::{
    DirectoryPropertyConfig, DirectoryUserConfig, MessagingAppConfig,
};
use estate_messaging::domain::model::{RealtimeEvent, Thread};
use estate_messaging::infrastructure::presence::ConnectionSender;
use estate_messaging::service::wire::initialize_in_memory;
use estate_messaging::{ApplicationContext, MessagingError};
use tokio::sync::mpsc::Receiver;

fn user(id: &str, name: &str) -> DirectoryUserConfig {
    DirectoryUserConfig {
        id: id.into(),
        display_name: Some(name.into()),
        avatar_url: None,
        can_buy: true,
        can_sell: true,
    }
}

fn context() -> Arc<ApplicationContext> {
    let _ = tracing_subscriber::fmt::try_init();
    let mut config = MessagingAppConfig::default();
    config.directory.users = vec![
        user("B", "Bea"),
        user("S", "Sam"),
        user("X", "Xavier"),
    ];
    config.directory.properties = vec![DirectoryPropertyConfig {
        id: "P1".into(),
        title: Some("Riverside flat".into()),
        owner_id: Some("S".into()),
    }];
    Arc::new(initialize_in_memory(&config))
}

fn connect(context: &ApplicationContext, user_id: &str, connection_id: &str) -> Receiver<Arc<RealtimeEvent>> {
    let (sender, rx) = ConnectionSender::channel(256);
    context
        .presence
        .register(user_id, connection_id, Arc::new(sender));
    rx
}

fn drain(rx: &mut Receiver<Arc<RealtimeEvent>>) -> Vec<Arc<RealtimeEvent>> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn resolve(context: &ApplicationContext, caller: &str, property: Option<&str>) -> Thread {
    context
        .command_handler
        .handle_resolve_thread(ResolveThreadCommand {
            caller_id: caller.into(),
            buyer_id: "B".into(),
            seller_id: "S".into(),
            property_id: property.map(str::to_string),
        })
        .await
        .unwrap()
        .thread
}

async fn send(context: &ApplicationContext, thread_id: &str, sender: &str, content: &str) -> Result<estate_messaging::domain::model::Message, MessagingError> {
    context
        .command_handler
        .handle_send_message(SendMessageCommand {
            thread_id: thread_id.into(),
            sender_id: sender.into(),
            content: content.into(),
            client_msg_id: None,
        })
        .await
}

async fn load(context: &ApplicationContext, thread_id: &str) -> Thread {
    context
        .query_handler
        .handle_get_thread(GetThreadQuery {
            thread_id: thread_id.into(),
            user_id: "B".into(),
        })
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolution_converges_on_one_thread() {
    let context = context();

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let context = context.clone();
            tokio::spawn(async move {
                let caller = if i % 2 == 0 { "B" } else { "S" };
                resolve(&context, caller, Some("P1")).await.id
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap());
    }
    assert_eq!(ids.len(), 1);

    let listed = context
        .query_handler
        .handle_list_threads(ListThreadsQuery {
            user_id: "B".into(),
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_never_lose_an_increment() {
    const K: usize = 64;
    let context = context();
    let thread = resolve(&context, "B", None).await;

    let tasks: Vec<_> = (0..K)
        .map(|i| {
            let context = context.clone();
            let thread_id = thread.id.clone();
            tokio::spawn(async move { send(&context, &thread_id, "B", &format!("msg {i}")).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let thread = load(&context, &thread.id).await;
    assert_eq!(thread.seller_unread_count as usize, K);
    assert_eq!(thread.buyer_unread_count, 0);

    let page = context
        .query_handler
        .handle_history(MessageHistoryQuery {
            thread_id: thread.id.clone(),
            user_id: "S".into(),
            after_seq: None,
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(page.messages.len(), K);
    // 顺序：seq 连续，createdAt 非递减，id 与 createdAt 同序
    for (i, pair) in page.messages.windows(2).enumerate() {
        assert_eq!(pair[0].seq, i as i64 + 1);
        assert!(pair[0].created_at <= pair[1].created_at);
        assert!(pair[0].id < pair[1].id);
    }
}

#[tokio::test]
async fn mark_read_resets_only_the_callers_side() {
    let context = context();
    let thread = resolve(&context, "B", None).await;
    send(&context, &thread.id, "B", "one").await.unwrap();
    send(&context, &thread.id, "S", "two").await.unwrap();
    send(&context, &thread.id, "S", "three").await.unwrap();

    context
        .command_handler
        .handle_mark_read(MarkReadCommand {
            thread_id: thread.id.clone(),
            user_id: "B".into(),
        })
        .await
        .unwrap();

    let thread = load(&context, &thread.id).await;
    assert_eq!(thread.buyer_unread_count, 0);
    assert_eq!(thread.seller_unread_count, 1);
}

#[tokio::test]
async fn non_participant_cannot_send() {
    let context = context();
    let thread = resolve(&context, "B", None).await;

    let err = send(&context, &thread.id, "X", "let me in").await.unwrap_err();
    assert!(matches!(err, MessagingError::NotAParticipant { .. }));

    let thread = load(&context, &thread.id).await;
    assert_eq!(thread.last_message_seq, 0);
    assert!(thread.last_message_at.is_none());
    let page = context
        .query_handler
        .handle_history(MessageHistoryQuery {
            thread_id: thread.id.clone(),
            user_id: "B".into(),
            after_seq: None,
            limit: None,
        })
        .await
        .unwrap();
    assert!(page.messages.is_empty());
}

#[tokio::test]
async fn every_connection_receives_exactly_one_new_message() {
    let context = context();
    let thread = resolve(&context, "B", None).await;
    let mut seller_tab1 = connect(&context, "S", "s-1");
    let mut seller_tab2 = connect(&context, "S", "s-2");
    let mut buyer_tab = connect(&context, "B", "b-1");
    let mut stranger = connect(&context, "X", "x-1");

    let message = send(&context, &thread.id, "B", "Is this available?").await.unwrap();

    for rx in [&mut seller_tab1, &mut seller_tab2, &mut buyer_tab] {
        let events = drain(rx);
        assert_eq!(events.len(), 1);
        match events[0].as_ref() {
            RealtimeEvent::NewMessage { message: received, .. } => assert_eq!(received.id, message.id),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(drain(&mut stranger).is_empty());
}

#[tokio::test]
async fn read_receipts_and_typing_go_to_the_counterpart_only() {
    let context = context();
    let thread = resolve(&context, "B", None).await;
    let mut buyer = connect(&context, "B", "b-1");
    let mut seller = connect(&context, "S", "s-1");

    send(&context, &thread.id, "B", "hello").await.unwrap();
    drain(&mut buyer);
    drain(&mut seller);

    context
        .command_handler
        .handle_mark_read(MarkReadCommand {
            thread_id: thread.id.clone(),
            user_id: "S".into(),
        })
        .await
        .unwrap();
    let events = drain(&mut buyer);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0].as_ref(),
        RealtimeEvent::MessagesRead { user_id, .. } if user_id == "S"
    ));
    assert!(drain(&mut seller).is_empty());

    // 已经为零时再次标记是空操作，不再通知
    context
        .command_handler
        .handle_mark_read(MarkReadCommand {
            thread_id: thread.id.clone(),
            user_id: "S".into(),
        })
        .await
        .unwrap();
    assert!(drain(&mut buyer).is_empty());

    context
        .command_handler
        .handle_typing(TypingCommand {
            thread_id: thread.id.clone(),
            user_id: "B".into(),
            is_typing: true,
        })
        .await
        .unwrap();
    let events = drain(&mut seller);
    assert!(matches!(
        events.as_slice(),
        [event] if matches!(event.as_ref(), RealtimeEvent::UserTyping { is_typing: true, .. })
    ));
    assert!(drain(&mut buyer).is_empty());
}

#[tokio::test]
async fn duplicate_send_is_stored_once() {
    let context = context();
    let thread = resolve(&context, "B", None).await;
    let command = SendMessageCommand {
        thread_id: thread.id.clone(),
        sender_id: "B".into(),
        content: "hello".into(),
        client_msg_id: Some("tmp-1".into()),
    };
    let first = context
        .command_handler
        .handle_send_message(command.clone())
        .await
        .unwrap();
    let retried = context
        .command_handler
        .handle_send_message(command)
        .await
        .unwrap();
    assert_eq!(first.id, retried.id);
    assert_eq!(load(&context, &thread.id).await.seller_unread_count, 1);
}

#[tokio::test]
async fn list_is_enriched_and_ordered_by_activity() {
    let context = context();
    let general = resolve(&context, "B", None).await;
    let listing = resolve(&context, "B", Some("P1")).await;
    send(&context, &general.id, "S", "older").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    send(&context, &listing.id, "S", "newer").await.unwrap();

    let threads = context
        .query_handler
        .handle_list_threads(ListThreadsQuery {
            user_id: "B".into(),
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(threads.len(), 2);
    assert_eq!(threads[0].thread_id, listing.id);
    assert_eq!(threads[0].property_title.as_deref(), Some("Riverside flat"));
    assert_eq!(threads[0].counterpart_name.as_deref(), Some("Sam"));
    assert_eq!(threads[0].unread_count, 1);
    assert_eq!(threads[1].thread_id, general.id);
    assert_eq!(threads[1].property_title, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buyer_seller_scenario() {
    let context = context();

    // B 并发两次为 P1 解析会话
    let (a, b) = tokio::join!(
        resolve(&context, "B", Some("P1")),
        resolve(&context, "B", Some("P1"))
    );
    assert_eq!(a.id, b.id);
    let t1 = a.id;

    send(&context, &t1, "B", "Is this available?").await.unwrap();
    assert_eq!(load(&context, &t1).await.seller_unread_count, 1);

    context
        .command_handler
        .handle_mark_read(MarkReadCommand {
            thread_id: t1.clone(),
            user_id: "S".into(),
        })
        .await
        .unwrap();
    assert_eq!(load(&context, &t1).await.seller_unread_count, 0);

    let reply = send(&context, &t1, "S", "Yes").await.unwrap();
    let thread = load(&context, &t1).await;
    assert_eq!(thread.buyer_unread_count, 1);
    assert_eq!(thread.last_message_at, Some(reply.created_at));
}
