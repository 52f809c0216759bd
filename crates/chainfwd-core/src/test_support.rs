//! Recording fakes for the ports, shared by the unit tests.

use std::sync::{
    atomic::{AtomicBool, AtomicI32, Ordering},
    Mutex,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, ChatTarget, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::ChatTransport,
        types::{ChatInfo, ChatKind, InlineKeyboard, JoinTarget, MemberStatus},
    },
    Result,
};

pub type ForwardCall = (ChatTarget, ChatId, MessageId);
pub type CopyCall = (ChatId, ChatId, MessageId);

pub struct FakeTransport {
    /// Chat id the converter bot lives in (used for forwarded copies).
    converter_chat: ChatId,
    next_id: AtomicI32,
    pub fail_forward: AtomicBool,
    pub fail_copy: AtomicBool,
    forwards: Mutex<Vec<ForwardCall>>,
    copies: Mutex<Vec<CopyCall>>,
    sends: Mutex<Vec<(ChatId, String)>>,
    keyboards: Mutex<Vec<(ChatId, String, InlineKeyboard)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    callbacks: Mutex<Vec<(String, Option<String>, bool)>>,
    chats: Mutex<Vec<ChatInfo>>,
    left: Mutex<Vec<ChatTarget>>,
}

impl FakeTransport {
    pub fn new(converter_chat: ChatId) -> Self {
        Self {
            converter_chat,
            next_id: AtomicI32::new(1000),
            fail_forward: AtomicBool::new(false),
            fail_copy: AtomicBool::new(false),
            forwards: Mutex::new(Vec::new()),
            copies: Mutex::new(Vec::new()),
            sends: Mutex::new(Vec::new()),
            keyboards: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            chats: Mutex::new(Vec::new()),
            left: Mutex::new(Vec::new()),
        }
    }

    fn alloc(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn with_chat(self, info: ChatInfo) -> Self {
        self.chats.lock().unwrap().push(info);
        self
    }

    pub fn forwards(&self) -> Vec<ForwardCall> {
        self.forwards.lock().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<CopyCall> {
        self.copies.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn keyboards(&self) -> Vec<(ChatId, String, InlineKeyboard)> {
        self.keyboards.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn callbacks(&self) -> Vec<(String, Option<String>, bool)> {
        self.callbacks.lock().unwrap().clone()
    }

    pub fn left(&self) -> Vec<ChatTarget> {
        self.left.lock().unwrap().clone()
    }

    fn find_chat(&self, target: &ChatTarget) -> Result<ChatInfo> {
        let chats = self.chats.lock().unwrap();
        chats
            .iter()
            .find(|c| match target {
                ChatTarget::Id(id) => c.id == *id,
                ChatTarget::Username(name) => c.username.as_deref() == Some(name.as_str()),
            })
            .cloned()
            .ok_or_else(|| Error::External("telegram error: chat not found".to_string()))
    }
}

pub fn channel(id: i64, title: &str, username: Option<&str>) -> ChatInfo {
    ChatInfo {
        id: ChatId(id),
        title: title.to_string(),
        kind: ChatKind::Channel,
        username: username.map(str::to_string),
        members_count: Some(12),
        description: None,
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn forward(
        &self,
        to: &ChatTarget,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> Result<MessageRef> {
        // Let a concurrently polled handler run in between, like a network call would.
        tokio::task::yield_now().await;
        if self.fail_forward.load(Ordering::SeqCst) {
            return Err(Error::External("telegram error: flood wait".to_string()));
        }
        self.forwards
            .lock()
            .unwrap()
            .push((to.clone(), from_chat, message_id));
        Ok(MessageRef {
            chat_id: self.converter_chat,
            message_id: self.alloc(),
        })
    }

    async fn copy(
        &self,
        to: ChatId,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> Result<MessageId> {
        tokio::task::yield_now().await;
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(Error::External("telegram error: not enough rights".to_string()));
        }
        self.copies.lock().unwrap().push((to, from_chat, message_id));
        Ok(self.alloc())
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.sends.lock().unwrap().push((chat_id, html.to_string()));
        Ok(MessageRef {
            chat_id,
            message_id: self.alloc(),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.edits.lock().unwrap().push((msg, html.to_string()));
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.keyboards
            .lock()
            .unwrap()
            .push((chat_id, html.to_string(), keyboard));
        Ok(MessageRef {
            chat_id,
            message_id: self.alloc(),
        })
    }

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        self.callbacks.lock().unwrap().push((
            callback_id.to_string(),
            text.map(str::to_string),
            show_alert,
        ));
        Ok(())
    }

    async fn get_chat(&self, target: &ChatTarget) -> Result<ChatInfo> {
        self.find_chat(target)
    }

    async fn join_chat(&self, target: &JoinTarget) -> Result<ChatInfo> {
        match target {
            JoinTarget::InviteLink(_) => Err(Error::External(
                "invite links cannot be used by bots".to_string(),
            )),
            JoinTarget::Chat(t) => self.find_chat(t),
        }
    }

    async fn leave_chat(&self, target: &ChatTarget) -> Result<()> {
        self.find_chat(target)?;
        self.left.lock().unwrap().push(target.clone());
        Ok(())
    }

    async fn my_status(&self, _chat_id: ChatId) -> Result<MemberStatus> {
        Ok(MemberStatus::Administrator)
    }
}
