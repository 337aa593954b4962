pub struct Session {
    pub user_id: i64,
    /// Sessions this connection is subscribed to. Membership here is granted
    /// by a SUBSCRIBE that passed the authorization gate and revoked when a
    /// removal event for this user arrives.
    pub subscriptions: Vec<i64>,
    pub connection_id: String,
    pub sequence: u64,
}

impl Session {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            subscriptions: Vec::new(),
            connection_id: uuid::Uuid::new_v4().to_string(),
            sequence: 0,
        }
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn should_receive_event(
        &self,
        session_id: Option<i64>,
        target_user_ids: Option<&[i64]>,
    ) -> bool {
        // Targeted events go to the named users regardless of subscription
        // (an invitee is not yet a subscriber of the session).
        if let Some(targets) = target_user_ids {
            return targets.contains(&self.user_id);
        }
        match session_id {
            None => true,
            Some(sid) => self.subscriptions.contains(&sid),
        }
    }

    pub fn subscribe(&mut self, session_id: i64) {
        if !self.subscriptions.contains(&session_id) {
            self.subscriptions.push(session_id);
        }
    }

    pub fn unsubscribe(&mut self, session_id: i64) {
        self.subscriptions.retain(|sid| *sid != session_id);
    }
}
