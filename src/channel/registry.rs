//! # 会话注册表
//!
//! 按会话标识持有每个渠道实例的状态。不同会话可以并发访问，
//! 同一会话的请求由外层框架串行化，这里用会话级互斥锁兜住。

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::channel::session::ChannelSession;
use crate::error::FailureKind;
use crate::logging::{LogComponent, LogStage};
use crate::{linfo, lwarn};

/// 注册表中的一个会话
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<ChannelSession>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// 会话状态
    #[must_use]
    pub fn session(&self) -> &Arc<Mutex<ChannelSession>> {
        &self.session
    }

    /// 会话结束时触发的取消令牌
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 会话是否已结束
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 会话注册表
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
}

impl SessionRegistry {
    /// 空注册表
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记会话；同一标识重复登记时替换旧会话并取消其进行中的抓取
    pub fn open(&self, session: ChannelSession) -> SessionHandle {
        let uid = session.uid.clone();
        let handle = SessionHandle {
            session: Arc::new(Mutex::new(session)),
            cancel: CancellationToken::new(),
        };

        if let Some(previous) = self.sessions.insert(uid.clone(), handle.clone()) {
            previous.cancel.cancel();
            lwarn!(
                uid,
                LogStage::SessionOpen,
                LogComponent::Registry,
                "session_replaced",
                "会话重复建立，替换旧会话"
            );
        }

        linfo!(
            uid,
            LogStage::SessionOpen,
            LogComponent::Registry,
            "session_opened",
            "会话已登记",
            active_sessions = self.sessions.len()
        );
        handle
    }

    /// 查找会话；不存在时记录日志并返回 `None`，由调用方降级处理
    #[must_use]
    pub fn get(&self, uid: &str, operation: &str) -> Option<SessionHandle> {
        let handle = self.sessions.get(uid).map(|entry| entry.value().clone());
        if handle.is_none() {
            lwarn!(
                uid,
                LogStage::Error,
                LogComponent::Registry,
                "missing_session",
                "访问未建立的会话，操作降级",
                kind = FailureKind::MissingSession.as_str(),
                caller = operation
            );
        }
        handle
    }

    /// 移除会话并取消进行中的抓取；返回会话是否存在
    pub fn close(&self, uid: &str) -> bool {
        let Some((_, handle)) = self.sessions.remove(uid) else {
            lwarn!(
                uid,
                LogStage::SessionClose,
                LogComponent::Registry,
                "close_missing_session",
                "关闭不存在的会话",
                kind = FailureKind::MissingSession.as_str()
            );
            return false;
        };

        handle.cancel.cancel();
        linfo!(
            uid,
            LogStage::SessionClose,
            LogComponent::Registry,
            "session_closed",
            "会话已移除",
            active_sessions = self.sessions.len()
        );
        true
    }

    /// 是否存在该会话
    #[must_use]
    pub fn contains(&self, uid: &str) -> bool {
        self.sessions.contains_key(uid)
    }

    /// 活跃会话数
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// 是否没有活跃会话
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::params::RequestParams;
    use crate::channel::types::Identity;
    use crate::config::ChannelDefaults;

    fn session(uid: &str) -> ChannelSession {
        ChannelSession::from_static(uid, Identity::new("7"), RequestParams::new(), &ChannelDefaults::default())
    }

    #[test]
    fn open_get_close() {
        let registry = SessionRegistry::new();
        let handle = registry.open(session("s1"));
        assert!(registry.contains("s1"));
        assert!(registry.get("s1", "test").is_some());
        assert!(registry.get("s2", "test").is_none());

        assert!(registry.close("s1"));
        assert!(handle.is_closed());
        assert!(registry.get("s1", "test").is_none());
        assert!(!registry.close("s1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn reopening_cancels_previous_session() {
        let registry = SessionRegistry::new();
        let first = registry.open(session("s1"));
        let second = registry.open(session("s1"));
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let registry = Arc::new(SessionRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let uid = format!("s{i}");
                let handle = registry.open(session(&uid));
                handle.session().lock().await.xml_uri = Some(format!("http://svc/{i}"));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.len(), 8);
        let handle = registry.get("s3", "test").unwrap();
        assert_eq!(handle.session().lock().await.xml_uri.as_deref(), Some("http://svc/3"));
    }
}
